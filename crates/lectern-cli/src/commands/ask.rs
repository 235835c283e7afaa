use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};

use lectern_core::research::{ResearchLoop, ResearchState, RunOutcome};
use lectern_core::{chat, Config, Retriever};

use crate::cli::AskArgs;

pub async fn run(args: AskArgs, config: Config) -> Result<()> {
    let index = super::open_index(&config).await?;
    let retriever = Retriever::new(index, config.research.relevance_threshold);
    let chat_model: Arc<dyn chat::ChatModel> = Arc::from(chat::from_config(&config.chat)?);

    let research = ResearchLoop::new(chat_model, retriever);

    // Ctrl+C cancels between nodes; the loop reports what it gathered
    let cancel = research.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, cancelling research loop");
            cancel.cancel();
        }
    });

    let mut state = match &args.question {
        Some(question) => ResearchState::with_query(&config.research, question),
        None => ResearchState::new(&config.research),
    };

    loop {
        match research.run(state).await? {
            RunOutcome::NeedsUserQuery {
                prompt,
                state: suspended,
            } => {
                state = suspended;
                state.user_query = prompt_user(&prompt)?;
            }
            RunOutcome::Finished(finished) => {
                println!("{}", finished.final_response);
                return Ok(());
            }
        }
    }
}

fn prompt_user(prompt: &str) -> Result<String> {
    print!("{prompt}\n> ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("Failed to read question")?;
    Ok(line.trim().to_string())
}
