use anyhow::Result;

use lectern_core::library::LibrarySource;
use lectern_core::Config;

pub async fn run(config: Config) -> Result<()> {
    let library = super::library_client(&config)?;
    let collections = library.list_collections().await?;

    if collections.is_empty() {
        println!("No collections.");
        return Ok(());
    }

    for (name, id) in &collections {
        println!("{id}  {name}");
    }

    Ok(())
}
