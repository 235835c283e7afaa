use anyhow::Result;

use lectern_core::Config;

pub async fn run(config: Config) -> Result<()> {
    let index = super::open_index(&config).await?;
    let stats = index.stats()?;

    println!("Collection: {}", index.collection());
    println!("Total chunks: {}", stats.total_chunks);
    println!("Items: {}", stats.items.len());
    for (item_id, item) in &stats.items {
        println!(
            "  {} - {} chunks - {} ({})",
            item_id,
            item.count,
            if item.title.is_empty() {
                "Untitled"
            } else {
                &item.title
            },
            item.citation_key,
        );
    }

    Ok(())
}
