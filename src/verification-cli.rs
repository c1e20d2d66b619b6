//! A simple CLI tool for verifying exported elections.
//! This uses the ledger's own verification implementation, and is by definition
//! compatible with the output of `Ledger::export`.

use std::fmt::{Display, Formatter};
use std::fs::File;
use std::io::BufReader;

use clap::{Arg, ArgAction, ArgMatches, Command};

use vote_ledger::verify::{verify_dump, ElectionDump, VerificationError};

const PROGRAM_NAME: &str = "verify-ledger";

const ABOUT_TEXT: &str = "Verify the integrity of an exported election.

EXIT CODES:
     0: Verification succeeded.
   255: Ran successfully, but verification failed.
 Other: Error.";

const DUMP_PATH: &str = "DUMP_PATH";

const DUMP_PATH_HELP: &str = "The path to a JSON dump of a single election,\n\
as produced by `Ledger::export`";

/// Construct the CLI configuration.
fn cli() -> Command {
    // Make the build dirty when the toml changes.
    include_str!("../Cargo.toml");

    clap::command!(PROGRAM_NAME).about(ABOUT_TEXT).arg(
        Arg::new(DUMP_PATH)
            .help(DUMP_PATH_HELP)
            .action(ArgAction::Set)
            .required(true),
    )
}

/// Errors that this program may produce.
#[derive(Debug, Eq, PartialEq)]
enum Error {
    /// IO error described by the inner message.
    IO(String),
    /// Failed to decode the JSON dump.
    Format(String),
    /// Verification failed due to the contained reason.
    Verification(VerificationError),
}

/// A friendly representation of the results for a particular candidate.
#[derive(Debug, PartialEq)]
struct FriendlyResults {
    pub candidate_name: String,
    pub votes: u64,
    pub percentage: f64,
}

impl Display for FriendlyResults {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} vote{} ({:.1}%)",
            self.candidate_name,
            self.votes,
            if self.votes != 1 { "s" } else { "" },
            self.percentage
        )
    }
}

/// Run verification.
fn verify(path: &str) -> Result<(ElectionDump, Vec<FriendlyResults>), Error> {
    // Load the file.
    let file = BufReader::new(File::open(path).map_err(|e| Error::IO(e.to_string()))?);
    let dump: ElectionDump =
        serde_json::from_reader(file).map_err(|e| Error::Format(e.to_string()))?;

    // Run verification.
    let results = verify_dump(&dump).map_err(Error::Verification)?;

    // Pair each result with the candidate's name, most votes first.
    let mut friendly_results = results
        .into_iter()
        .map(|result| FriendlyResults {
            candidate_name: dump
                .election
                .candidate(&result.candidate_id)
                .map(|candidate| candidate.name.clone())
                .unwrap_or_else(|| result.candidate_id.to_string()),
            votes: result.vote_count,
            percentage: result.percentage,
        })
        .collect::<Vec<_>>();
    friendly_results.sort_by(|a, b| {
        b.votes
            .cmp(&a.votes)
            .then_with(|| a.candidate_name.cmp(&b.candidate_name))
    });

    Ok((dump, friendly_results))
}

/// Run verification, report the result, and return the exit code.
fn run(args: &ArgMatches) -> u8 {
    let Some(path) = args.get_one::<String>(DUMP_PATH) else {
        println!("No dump given.");
        return 1;
    };
    match verify(path) {
        Ok((dump, friendly_results)) => {
            println!("Verification succeeded.");
            println!(
                "Election {} \"{}\" ({}): {} vote{}, {} audit entr{}",
                dump.election.id,
                dump.election.title,
                dump.election.status,
                dump.votes.len(),
                if dump.votes.len() != 1 { "s" } else { "" },
                dump.audit.len(),
                if dump.audit.len() != 1 { "ies" } else { "y" },
            );
            for result in friendly_results {
                println!("{}", result);
            }
            0
        }
        Err(Error::IO(msg)) => {
            println!("IO error: {}", msg);
            1
        }
        Err(Error::Format(msg)) => {
            println!("Invalid JSON: {}", msg);
            1
        }
        Err(Error::Verification(err)) => {
            println!("Verification failed: {}", err);
            255
        }
    }
}

fn main() {
    let args = cli().get_matches();
    let exit_code = run(&args);
    std::process::exit(exit_code.into())
}
