//! Question answering and summarization commands.
//!
//! `ask` answers one question, `chat` runs an interactive loop that threads
//! a [`ConversationHistory`] through every turn, and `summarize` condenses
//! either the whole corpus or a single file indexed into a throwaway
//! in-memory index.

use anyhow::Result;
use std::io::Write;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::chunk::Chunker;
use crate::config::Config;
use crate::error::RagError;
use crate::generate::{AnswerGenerator, Response, DEFAULT_SUMMARY_INSTRUCTION};
use crate::history::{ConversationHistory, Role, DISPLAY_WINDOW};
use crate::index::{IndexMode, VectorIndex};
use crate::ingest;
use crate::loader;
use crate::provider::ProviderSettings;
use crate::retriever::Retriever;

/// One exchange: answer `question` and record both sides in `history`.
pub async fn chat_turn(
    generator: &AnswerGenerator,
    index: &VectorIndex,
    history: ConversationHistory,
    question: &str,
) -> Result<(ConversationHistory, Response)> {
    let response = generator.answer(index, question).await?;
    let history = history
        .with_turn(Role::User, question)
        .with_turn(Role::Assistant, response.text());
    Ok((history, response))
}

fn generator(config: &Config, settings: &ProviderSettings) -> AnswerGenerator {
    AnswerGenerator::new(settings.llm.clone(), Retriever::new(config.retrieval.top_k))
}

fn require_question(question: &str) -> Result<&str> {
    let question = question.trim();
    if question.is_empty() {
        return Err(RagError::config("question must not be empty").into());
    }
    Ok(question)
}

pub async fn run_ask(config: &Config, mode: IndexMode, question: &str, json: bool) -> Result<()> {
    let question = require_question(question)?;
    let settings = ProviderSettings::from_env(&config.provider)?;
    let index = VectorIndex::open(&settings, mode).await?;

    let response = generator(config, &settings).answer(&index, question).await?;
    print_response(&response, json)
}

pub async fn run_chat(config: &Config, mode: IndexMode) -> Result<()> {
    let settings = ProviderSettings::from_env(&config.provider)?;
    let index = VectorIndex::open(&settings, mode).await?;
    let generator = generator(config, &settings);

    println!(
        "Chatting with {} ({} indexed chunks). Type 'exit' to quit.",
        settings.chat_model,
        index.len().saturating_sub(1)
    );

    let mut history = ConversationHistory::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if matches!(question, "exit" | "quit") {
            break;
        }

        let (next, response) = match chat_turn(&generator, &index, history.clone(), question).await {
            Ok(turn) => turn,
            Err(e) => {
                if e.downcast_ref::<RagError>().is_some_and(RagError::is_fail_fast) {
                    return Err(e);
                }
                eprintln!("Error: {:#}", e);
                continue;
            }
        };
        history = next;

        for turn in history.recent(DISPLAY_WINDOW) {
            println!("{}: {}", turn.role, turn.message);
        }
        print_sources(&response);
        println!();
    }
    Ok(())
}

pub async fn run_summarize(
    config: &Config,
    mode: IndexMode,
    file: Option<&Path>,
    instruction: Option<&str>,
    json: bool,
) -> Result<()> {
    let instruction = instruction
        .map(str::trim)
        .filter(|i| !i.is_empty())
        .unwrap_or(DEFAULT_SUMMARY_INSTRUCTION);

    let response = match file {
        Some(file) => {
            loader::check_supported(file)?;
            let chunker = Chunker::from_config(&config.chunking)?;
            let settings = ProviderSettings::from_env(&config.provider)?;
            let mut index = VectorIndex::open(&settings, IndexMode::Ephemeral).await?;
            let count = ingest::ingest_files(&[file.to_path_buf()], &mut index, &chunker).await?;
            tracing::info!(file = %file.display(), chunks = count, "indexed file for summary");
            generator(config, &settings).summarize(&index, instruction).await?
        }
        None => {
            let settings = ProviderSettings::from_env(&config.provider)?;
            let index = VectorIndex::open(&settings, mode).await?;
            generator(config, &settings).summarize(&index, instruction).await?
        }
    };
    print_response(&response, json)
}

fn print_response(response: &Response, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(response)?);
        return Ok(());
    }
    println!("{}", response.text());
    print_sources(response);
    Ok(())
}

fn print_sources(response: &Response) {
    if response.sources().is_empty() {
        return;
    }
    println!();
    println!("Sources");
    for source in response.sources() {
        println!("{}", source.label());
    }
}
