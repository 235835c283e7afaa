use anyhow::{bail, Result};

use lectern_core::Config;

use crate::cli::ClearArgs;

pub async fn run(args: ClearArgs, config: Config) -> Result<()> {
    if !args.confirm {
        bail!("clearing deletes every indexed chunk; pass --confirm to proceed");
    }

    let index = super::open_index(&config).await?;
    let before = index.stats()?.total_chunks;
    index.clear().await?;
    println!("Cleared {} chunks from {}", before, index.collection());

    Ok(())
}
