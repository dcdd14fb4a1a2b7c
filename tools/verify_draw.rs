//! Offline draw verifier.
//!
//! Replays pot draws and battle rolls from published inputs, with nothing
//! but this binary. Exits non-zero when a commitment fails or a reported
//! value does not match the replay.

use caseforge::errors::EngineError;
use caseforge::fairness::FairnessEngine;
use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "verify_draw")]
#[command(about = "Replay provably-fair draws from published inputs", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Recompute the winning ticket of a settled pot
    Pot {
        /// Pot id
        #[arg(long)]
        id: Uuid,

        /// Revealed server seed (hex)
        #[arg(long)]
        seed: String,

        /// Published commitment (SHA-256 hex of the seed bytes)
        #[arg(long)]
        hash: String,

        /// Tickets sold when the pot locked
        #[arg(long)]
        tickets: u32,

        /// Winning ticket the operator reported, to check a claim
        #[arg(long)]
        expect: Option<u32>,
    },

    /// Recompute one battle roll
    Roll {
        /// Battle id
        #[arg(long)]
        id: Uuid,

        /// Revealed server seed (hex)
        #[arg(long)]
        seed: String,

        /// Published commitment (SHA-256 hex of the seed bytes)
        #[arg(long)]
        hash: String,

        /// Client seed of the participant's seat (empty if none was set)
        #[arg(long, default_value = "")]
        client_seed: String,

        /// Zero-based case position in the battle
        #[arg(long)]
        case_index: u32,

        /// Zero-based seat in join order
        #[arg(long)]
        participant_index: u32,

        /// Total weight of the case's item table
        #[arg(long)]
        total_weight: u64,

        /// Roll the operator reported, to check a claim
        #[arg(long)]
        expect: Option<u64>,
    },

    /// Recompute a tie draw-off pick
    DrawOff {
        /// Battle id
        #[arg(long)]
        id: Uuid,

        /// Revealed server seed (hex)
        #[arg(long)]
        seed: String,

        /// Published commitment (SHA-256 hex of the seed bytes)
        #[arg(long)]
        hash: String,

        /// Number of tied participants
        #[arg(long)]
        tied: u32,

        /// Pick the operator reported, to check a claim
        #[arg(long)]
        expect: Option<u32>,
    },
}

fn main() {
    let args = Args::parse();

    let code = match args.command {
        Command::Pot {
            id,
            seed,
            hash,
            tickets,
            expect,
        } => match FairnessEngine::draw_pot_winner(&seed, &hash, id, tickets) {
            Ok(ticket) => {
                println!("Commitment: OK");
                println!("Message:    {}", FairnessEngine::pot_draw_message(id, &seed));
                println!("Winning ticket: {}", ticket);
                check(expect.map(u64::from), u64::from(ticket))
            }
            Err(err) => fail(&err),
        },

        Command::Roll {
            id,
            seed,
            hash,
            client_seed,
            case_index,
            participant_index,
            total_weight,
            expect,
        } => match FairnessEngine::battle_roll(
            &seed,
            &hash,
            id,
            &client_seed,
            case_index,
            participant_index,
            total_weight,
        ) {
            Ok(roll) => {
                println!("Commitment: OK");
                println!(
                    "Message:    {}",
                    FairnessEngine::battle_roll_message(
                        id,
                        &seed,
                        &client_seed,
                        case_index,
                        participant_index
                    )
                );
                println!("Roll: {}", roll);
                check(expect, roll)
            }
            Err(err) => fail(&err),
        },

        Command::DrawOff {
            id,
            seed,
            hash,
            tied,
            expect,
        } => match FairnessEngine::battle_draw_off(&seed, &hash, id, tied) {
            Ok(pick) => {
                println!("Commitment: OK");
                println!("Draw-off pick: {}", pick);
                check(expect.map(u64::from), u64::from(pick))
            }
            Err(err) => fail(&err),
        },
    };

    std::process::exit(code);
}

fn check(expect: Option<u64>, actual: u64) -> i32 {
    match expect {
        Some(expected) if expected != actual => {
            println!(
                "❌ Reported value {} does not match replayed value {}",
                expected, actual
            );
            1
        }
        Some(_) => {
            println!("✅ Matches the reported value");
            0
        }
        None => 0,
    }
}

fn fail(err: &EngineError) -> i32 {
    println!("❌ {}", err);
    1
}
