//! Interactive chat loop over analyzed papers.

use paperpilot_core::{AnswerStrategy, ChatSession};
use std::io::Write as _;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

/// Run the read-eval-print loop until EOF or an exit command.
pub async fn run(mut session: ChatSession) -> anyhow::Result<()> {
    println!("Chat about your analyzed papers. Type 'exit' or 'quit' to leave.\n");

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        print!("you> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question.eq_ignore_ascii_case("exit") || question.eq_ignore_ascii_case("quit") {
            break;
        }

        let answer = session.ask(question).await;
        debug!(strategy = ?answer.strategy, "Turn answered");
        println!("\n{}\n", answer.text);
        if answer.strategy == AnswerStrategy::ContextOnly {
            println!("(answered from the preloaded analysis context)\n");
        }
    }

    println!("Goodbye.");
    Ok(())
}
