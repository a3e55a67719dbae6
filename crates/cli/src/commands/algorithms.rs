//! Strategy listing command

use biocluster_core::StrategyRegistry;

pub fn list_algorithms() {
    println!("Available algorithms:");

    let registry = StrategyRegistry::with_defaults();
    for strategy in registry.strategies() {
        println!("\n{}", strategy.name());
        println!("  Description: {}", strategy.description());
        if !strategy.aliases().is_empty() {
            println!("  Aliases: {}", strategy.aliases().join(", "));
        }
        println!("  Parameters: {}", strategy.recognized_params().join(", "));
    }
}
