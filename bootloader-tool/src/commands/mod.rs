mod inspect;
mod pack;
mod simulate;

pub use inspect::process as inspect;
pub use pack::process as pack;
pub use simulate::process as simulate;

use crate::{Commands, config::Config};

pub async fn process(config: &Config, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Pack(args) => {
            let _ = pack::process(config, args).await?;
            Ok(())
        }
        Commands::Inspect(args) => {
            let _ = inspect::process(config, args).await?;
            Ok(())
        }
        Commands::Simulate(args) => {
            let decision = simulate::process(config, args).await?;
            println!("{decision:?}");
            Ok(())
        }
    }
}
