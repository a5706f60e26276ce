//! Entry point for the command-line interface.

use popchain::args::{parse_cli, Commands};
use popchain::scan::{run_gadgets, run_scan};

fn main() -> anyhow::Result<()> {
    let cli = parse_cli();
    match cli.command {
        Commands::Scan(args) => run_scan(args),
        Commands::Gadgets(args) => run_gadgets(args),
    }
}
