use anyhow::Result;

use lectern_core::{Config, Retriever};

use crate::cli::SearchArgs;

pub async fn run(args: SearchArgs, config: Config) -> Result<()> {
    let index = super::open_index(&config).await?;
    let retriever = Retriever::new(index, config.research.relevance_threshold);
    let k = args.k.unwrap_or(config.research.k_documents);

    let hits = match &args.item {
        Some(item_id) => retriever.by_item(item_id, &args.query, k).await?,
        None => retriever.semantic(&args.query, k).await?,
    };

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (rank, hit) in hits.iter().enumerate() {
        let chunk = &hit.chunk;
        println!(
            "{}. [{:.3}] {} ({})",
            rank + 1,
            hit.distance,
            if chunk.title.is_empty() {
                "Untitled"
            } else {
                &chunk.title
            },
            chunk.citation_key,
        );
        if let Some(section) = chunk.deepest_level() {
            println!("   section: {section}");
        }
        println!("   {}", preview(&chunk.content, 240));
    }

    Ok(())
}

fn preview(content: &str, max_chars: usize) -> String {
    let flat = content.replace('\n', " ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let truncated: String = flat.chars().take(max_chars).collect();
    format!("{truncated}...")
}
