//! Salon receptionist on the terminal
//!
//! Reads one customer line per stdin line and prints the assistant's reply.
//! Logs go to stderr as JSON.

use llm_fsm::llm::LlmConfig;
use llm_fsm::runtime::{MachineDefaults, RunOptions};
use llm_fsm::salon::{self, tools, BookingStore};
use llm_fsm::state_machine::DEFAULT_OUTPUT_VAR;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const APOLOGY: &str = "Sorry, something went wrong on my side. Could you say that again?";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "llm_fsm=info,salon_agent=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let llm_config = LlmConfig::from_env();
    let Some(gateway) = llm_config.build_service() else {
        tracing::error!("No LLM API key configured. Set OPENAI_API_KEY.");
        return Err("missing OPENAI_API_KEY".into());
    };
    tracing::info!(
        model = %llm_config.default_model,
        base_url = %llm_config.base_url,
        "LLM gateway initialized"
    );

    let store = Arc::new(BookingStore::demo());
    let mut machine =
        salon::build_machine(&store, gateway, MachineDefaults::from_config(&llm_config))?;
    println!("{}", salon::greet(&mut machine)?);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match machine.run(line, RunOptions::default()).await {
            Ok(result) => {
                let farewell = result
                    .context
                    .tool_arguments(tools::END_CALL)
                    .and_then(|args| args.get("message"))
                    .and_then(serde_json::Value::as_str);
                let reply = result.answer(DEFAULT_OUTPUT_VAR).or(farewell);
                if let Some(reply) = reply {
                    println!("{reply}");
                }
                if result.completed {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Turn failed");
                println!("{APOLOGY}");
            }
        }
    }

    tracing::info!(
        conv_id = %machine.conversation_id(),
        appointments = store.appointments().len(),
        "Conversation finished"
    );
    Ok(())
}
