use anyhow::{bail, Result};

use lectern_core::indexer::{Indexer, IndexingConfig, IndexingResult};
use lectern_core::{CommandConverter, Config, ConverterGateway, ItemSelector};

use crate::cli::IndexArgs;

pub async fn run(args: IndexArgs, config: Config) -> Result<()> {
    let library = super::library_client(&config)?;
    let index = super::open_index(&config).await?;

    let converter_command = config.converter_command.clone();
    let gateway = match converter_command {
        Some(ref template) => ConverterGateway::new(
            Box::new(CommandConverter::new(template)),
            config.skip_existing_markdown,
        ),
        None if args.local_markdown => {
            // Never invoked on this path; any converter satisfies the type
            ConverterGateway::new(
                Box::new(CommandConverter::new("false")),
                config.skip_existing_markdown,
            )
        }
        None => bail!("converter_command is not configured in settings"),
    };

    let indexer = Indexer::new(
        library,
        gateway,
        index,
        IndexingConfig {
            markdown_root: config.markdown_root.clone(),
            force_reindex: config.force_reindex,
            chunker: config.chunker.clone(),
        },
    );

    let progress = |done: usize, total: usize| {
        eprintln!("  [{done}/{total}]");
    };

    let result = if args.local_markdown {
        indexer
            .index_local_markdown(args.force, Some(&progress))
            .await?
    } else {
        let selector = selector_from_args(&args)?;
        indexer
            .update_index(&selector, args.force, Some(&progress))
            .await?
    };

    print_result(&result);
    Ok(())
}

fn selector_from_args(args: &IndexArgs) -> Result<ItemSelector> {
    if let Some(name) = &args.collection {
        Ok(ItemSelector::ByCollectionName(name.clone()))
    } else if let Some(id) = &args.collection_id {
        Ok(ItemSelector::ByCollectionId(id.clone()))
    } else if let Some(id) = &args.item {
        Ok(ItemSelector::ById(id.clone()))
    } else if let Some(q) = &args.query {
        Ok(ItemSelector::ByName(q.clone()))
    } else {
        bail!("select items with --collection, --collection-id, --item or --query")
    }
}

fn print_result(result: &IndexingResult) {
    println!("Indexed {}/{} items", result.successful, result.total);
    if result.skipped > 0 {
        println!("  skipped (already indexed): {}", result.skipped);
    }
    println!("  chunks created: {}", result.chunks_created);
    if result.failed > 0 {
        println!("  failed: {}", result.failed);
        for failed in &result.failed_items {
            let path = failed
                .pdf_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".to_string());
            println!("    {} ({}): {}", failed.item_id, path, failed.reason);
        }
    }
}
