//! upkeep-cli: thin CLI entry point for the upkeep update orchestrator.

fn main() -> anyhow::Result<()> {
    println!("upkeep-cli v{}", env!("CARGO_PKG_VERSION"));
    println!("run `upkeep` for the interactive update orchestrator");
    Ok(())
}
