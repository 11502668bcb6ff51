//! Library-level pipeline tests with deterministic in-process models.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use tempfile::TempDir;

use kb_assistant::chat::chat_turn;
use kb_assistant::chunk::Chunker;
use kb_assistant::config::{Backend, ConfluenceConfig, ConfluenceCredentials};
use kb_assistant::confluence::PageSource;
use kb_assistant::error::RagError;
use kb_assistant::generate::{AnswerGenerator, Response, NO_CONTEXT_ANSWER};
use kb_assistant::history::{ConversationHistory, Role};
use kb_assistant::index::{IndexMode, VectorIndex};
use kb_assistant::ingest::{add_documents, ingest_files, ingest_pages, ingest_space};
use kb_assistant::models::{Document, Metadata};
use kb_assistant::provider::{ChatModel, Embedder, ProviderSettings};
use kb_assistant::retriever::Retriever;

// ============ Fakes ============

/// Lowercased words hashed into 32 buckets.
struct WordEmbedder;

#[async_trait]
impl Embedder for WordEmbedder {
    fn model_name(&self) -> &str {
        "word-buckets"
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut v = vec![0.0f32; 32];
                for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
                    let bucket = word
                        .to_lowercase()
                        .bytes()
                        .fold(7usize, |h, b| h.wrapping_mul(31).wrapping_add(b as usize))
                        % 32;
                    v[bucket] += 1.0;
                }
                v
            })
            .collect())
    }
}

#[derive(Default)]
struct RecordingChat {
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl RecordingChat {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn last_prompt(&self) -> String {
        self.prompts.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ChatModel for RecordingChat {
    fn model_name(&self) -> &str {
        "recording"
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok("Use the blue key.".to_string())
    }
}

/// Confluence stand-in that serves fixed documents and counts calls.
struct FakePages {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl PageSource for FakePages {
    async fn space_pages(&self, space_key: &str, _cql: Option<&str>) -> Result<Vec<Document>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let url = format!("https://wiki.example.com/spaces/{}/pages/1/Keys", space_key);
        Ok(vec![Document::new(
            "Key rotation happens every quarter using the blue key ceremony.",
            Metadata {
                source: Some(url.clone()),
                url: Some(url),
                title: Some("Keys".into()),
                page_id: Some("1".into()),
                ..Default::default()
            },
        )])
    }

    async fn pages(&self, ids_or_urls: &[String]) -> Result<Vec<Document>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ids_or_urls
            .iter()
            .map(|id| Document::new(format!("Page {} body text", id), Metadata::default()))
            .collect())
    }
}

// ============ Helpers ============

fn settings(chat: Arc<RecordingChat>) -> ProviderSettings {
    ProviderSettings::new(Backend::OpenAi, chat, Arc::new(WordEmbedder))
}

fn write(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

fn confluence_config() -> ConfluenceConfig {
    ConfluenceConfig {
        url: Some("https://wiki.example.com".into()),
        username: Some("bot@example.com".into()),
        api_token: Some("token".into()),
    }
}

fn rag_error(err: &anyhow::Error) -> &RagError {
    err.downcast_ref::<RagError>()
        .unwrap_or_else(|| panic!("expected RagError, got {:#}", err))
}

// ============ Ingestion ============

#[tokio::test]
async fn test_three_thousand_char_file_yields_three_chunks() {
    let tmp = TempDir::new().unwrap();
    let store = tmp.path().join("vectorstore");
    let file = write(tmp.path(), "paragraph.txt", &"abcdefghij".repeat(300));

    let s = settings(Arc::new(RecordingChat::default()));
    let mut index = VectorIndex::open(&s, IndexMode::Load(store.clone())).await.unwrap();
    let count = ingest_files(&[file.clone()], &mut index, &Chunker::default())
        .await
        .unwrap();

    assert_eq!(count, 3);
    assert_eq!(index.len(), 4);
    let expected_source = file.to_string_lossy().into_owned();
    let stored: Vec<_> = index.entries().iter().filter(|e| !e.placeholder).collect();
    assert_eq!(stored.len(), 3);
    for entry in &stored {
        assert_eq!(entry.chunk.metadata.source.as_deref(), Some(expected_source.as_str()));
        assert!(entry.chunk.text.chars().count() <= 1200);
    }
    assert!(store.join("index.json").exists());
    assert!(store.join("index.vec").exists());
}

#[tokio::test]
async fn test_empty_batch_leaves_index_untouched() {
    let tmp = TempDir::new().unwrap();
    let store = tmp.path().join("vectorstore");
    let file = write(tmp.path(), "empty.txt", "   \n\n ");

    let s = settings(Arc::new(RecordingChat::default()));
    let mut index = VectorIndex::open(&s, IndexMode::Load(store.clone())).await.unwrap();
    let count = ingest_files(&[file], &mut index, &Chunker::default()).await.unwrap();

    assert_eq!(count, 0);
    assert_eq!(index.len(), 1);
    assert!(!store.exists());

    assert_eq!(add_documents(Vec::new(), &mut index, &Chunker::default()).await.unwrap(), 0);
    assert_eq!(index.add(Vec::new()).await.unwrap(), 0);
    assert_eq!(index.len(), 1);
}

#[tokio::test]
async fn test_unsupported_file_aborts_whole_batch() {
    let tmp = TempDir::new().unwrap();
    let good = write(tmp.path(), "good.md", "Some useful notes about deployment.");
    let bad = write(tmp.path(), "table.xlsx", "not really a spreadsheet");

    let s = settings(Arc::new(RecordingChat::default()));
    let mut index = VectorIndex::open(&s, IndexMode::Ephemeral).await.unwrap();
    let err = ingest_files(&[good, bad], &mut index, &Chunker::default())
        .await
        .unwrap_err();

    match rag_error(&err) {
        RagError::UnsupportedFormat { extension } => assert_eq!(extension, ".xlsx"),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(index.len(), 1);
}

#[tokio::test]
async fn test_persist_failure_still_reports_chunks() {
    let tmp = TempDir::new().unwrap();
    // A regular file where the index directory should go.
    let blocked = write(tmp.path(), "not-a-dir", "");
    let file = write(tmp.path(), "notes.txt", "Backups run nightly at two.");

    let s = settings(Arc::new(RecordingChat::default()));
    let mut index = VectorIndex::open(&s, IndexMode::Recreate(blocked)).await.unwrap();
    let count = ingest_files(&[file], &mut index, &Chunker::default()).await.unwrap();

    assert_eq!(count, 1);
    assert_eq!(index.len(), 2);
}

#[tokio::test]
async fn test_ephemeral_index_is_never_written() {
    let tmp = TempDir::new().unwrap();
    let file = write(tmp.path(), "single.txt", "A short report about quarterly revenue.");

    let s = settings(Arc::new(RecordingChat::default()));
    let mut index = VectorIndex::open(&s, IndexMode::Ephemeral).await.unwrap();
    ingest_files(&[file], &mut index, &Chunker::default()).await.unwrap();

    assert_eq!(index.path(), None);
    let leftovers: Vec<_> = fs::read_dir(tmp.path()).unwrap().collect();
    assert_eq!(leftovers.len(), 1);
}

// ============ Index lifecycle ============

#[tokio::test]
async fn test_reload_gives_identical_retrieval() {
    let tmp = TempDir::new().unwrap();
    let store = tmp.path().join("vectorstore");
    let files = vec![
        write(tmp.path(), "rust.md", "Rust uses cargo to build crates and manage dependencies."),
        write(tmp.path(), "ops.md", "Deployments go through the staging cluster before production."),
        write(tmp.path(), "keys.txt", "Rotate the signing key every quarter with the blue key."),
    ];

    let s = settings(Arc::new(RecordingChat::default()));
    let retriever = Retriever::new(3);
    let before = {
        let mut index = VectorIndex::open(&s, IndexMode::Load(store.clone())).await.unwrap();
        ingest_files(&files, &mut index, &Chunker::default()).await.unwrap();
        retriever.retrieve(&index, "how do we rotate keys").await.unwrap()
    };

    let reloaded = VectorIndex::open(&s, IndexMode::Load(store.clone())).await.unwrap();
    assert_eq!(reloaded.len(), 4);
    let after = retriever.retrieve(&reloaded, "how do we rotate keys").await.unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_recreate_yields_only_placeholder() {
    let tmp = TempDir::new().unwrap();
    let store = tmp.path().join("vectorstore");
    let file = write(tmp.path(), "a.txt", "alpha beta gamma");

    let s = settings(Arc::new(RecordingChat::default()));
    let mut index = VectorIndex::open(&s, IndexMode::Load(store.clone())).await.unwrap();
    ingest_files(&[file], &mut index, &Chunker::default()).await.unwrap();

    let fresh = VectorIndex::open(&s, IndexMode::Recreate(store.clone())).await.unwrap();
    assert_eq!(fresh.len(), 1);
    assert!(fresh.entries()[0].placeholder);
}

#[tokio::test]
async fn test_retrieve_is_bounded_and_ordered() {
    let tmp = TempDir::new().unwrap();
    let files: Vec<_> = (0..8)
        .map(|i| {
            write(
                tmp.path(),
                &format!("doc{}.txt", i),
                &format!("document {} mentions topic{} and shared words", i, i % 3),
            )
        })
        .collect();

    let s = settings(Arc::new(RecordingChat::default()));
    let mut index = VectorIndex::open(&s, IndexMode::Ephemeral).await.unwrap();
    ingest_files(&files, &mut index, &Chunker::default()).await.unwrap();

    for k in [2, 5, 15] {
        let hits = Retriever::new(k).retrieve(&index, "topic1 shared").await.unwrap();
        assert!(hits.len() <= k);
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
    }
}

// ============ Generation ============

#[tokio::test]
async fn test_empty_index_answers_dont_know() {
    let chat = Arc::new(RecordingChat::default());
    let s = settings(chat.clone());
    let index = VectorIndex::open(&s, IndexMode::Ephemeral).await.unwrap();
    let generator = AnswerGenerator::new(chat.clone(), Retriever::new(5));

    let response = generator.answer(&index, "What is the refund policy?").await.unwrap();
    assert_eq!(response.text(), NO_CONTEXT_ANSWER);
    assert!(response.text().contains("don't know"));
    assert!(response.sources().is_empty());
    assert_eq!(chat.calls(), 0);
}

#[tokio::test]
async fn test_answer_builds_prompt_from_retrieved_chunks() {
    let tmp = TempDir::new().unwrap();
    let file = write(tmp.path(), "keys.txt", "Rotate the signing key with the blue key.");
    let chat = Arc::new(RecordingChat::default());
    let s = settings(chat.clone());
    let mut index = VectorIndex::open(&s, IndexMode::Ephemeral).await.unwrap();
    ingest_files(&[file.clone()], &mut index, &Chunker::default()).await.unwrap();

    let generator = AnswerGenerator::new(chat.clone(), Retriever::new(5));
    let response = generator.answer(&index, "Which key do we rotate?").await.unwrap();

    assert_eq!(chat.calls(), 1);
    let prompt = chat.last_prompt();
    assert!(prompt.contains("Question: Which key do we rotate?"));
    assert!(prompt.contains(&format!("[source: {}]", file.display())));
    assert!(!prompt.contains("Initialization vector"));

    match response {
        Response::Answer {
            answer,
            source_documents,
        } => {
            assert_eq!(answer, "Use the blue key.");
            assert_eq!(source_documents.len(), 1);
            assert_eq!(source_documents[0].label(), "- keys.txt");
        }
        other => panic!("expected an answer, got {:?}", other),
    }
}

#[tokio::test]
async fn test_seed_entry_does_not_shrink_context() {
    let tmp = TempDir::new().unwrap();
    let a = write(tmp.path(), "a.txt", "Vector initialization happens at startup.");
    let b = write(tmp.path(), "b.txt", "The cache is warmed before serving traffic.");
    let chat = Arc::new(RecordingChat::default());
    let s = settings(chat.clone());
    let mut index = VectorIndex::open(&s, IndexMode::Ephemeral).await.unwrap();
    ingest_files(&[a, b], &mut index, &Chunker::default()).await.unwrap();

    // The query matches the seed text exactly, so the seed ranks first.
    let generator = AnswerGenerator::new(chat.clone(), Retriever::new(2));
    let response = generator.answer(&index, "Initialization vector").await.unwrap();

    assert_eq!(response.sources().len(), 2);
    let prompt = chat.last_prompt();
    assert!(prompt.contains("Vector initialization happens"));
    assert!(prompt.contains("The cache is warmed"));
}

#[tokio::test]
async fn test_summarize_uses_instruction() {
    let tmp = TempDir::new().unwrap();
    let file = write(tmp.path(), "report.md", "Revenue grew while churn stayed flat.");
    let chat = Arc::new(RecordingChat::default());
    let s = settings(chat.clone());
    let mut index = VectorIndex::open(&s, IndexMode::Ephemeral).await.unwrap();
    ingest_files(&[file], &mut index, &Chunker::default()).await.unwrap();

    let generator = AnswerGenerator::new(chat.clone(), Retriever::new(5));
    let response = generator.summarize(&index, "Focus on churn.").await.unwrap();

    assert!(matches!(response, Response::Summary { .. }));
    assert_eq!(response.sources().len(), 1);
    let prompt = chat.last_prompt();
    assert!(prompt.contains("Instruction: Focus on churn."));
    assert!(prompt.contains("Revenue grew"));
}

#[tokio::test]
async fn test_chat_turn_threads_history() {
    let tmp = TempDir::new().unwrap();
    let file = write(tmp.path(), "keys.txt", "Rotate the signing key with the blue key.");
    let chat = Arc::new(RecordingChat::default());
    let s = settings(chat.clone());
    let mut index = VectorIndex::open(&s, IndexMode::Ephemeral).await.unwrap();
    ingest_files(&[file], &mut index, &Chunker::default()).await.unwrap();
    let generator = AnswerGenerator::new(chat.clone(), Retriever::new(2));

    let history = ConversationHistory::new();
    let (history, _) = chat_turn(&generator, &index, history, "Which key?").await.unwrap();
    let (history, _) = chat_turn(&generator, &index, history, "How often?").await.unwrap();

    assert_eq!(history.len(), 4);
    let roles: Vec<Role> = history.turns().iter().map(|t| t.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User, Role::Assistant]);
    assert_eq!(history.turns()[2].message, "How often?");
    // No memory leaks into the prompt.
    assert!(!chat.last_prompt().contains("Which key?"));
}

// ============ Confluence ============

#[tokio::test]
async fn test_missing_confluence_credentials_never_connect() {
    let connects = Arc::new(AtomicUsize::new(0));
    let fetches = Arc::new(AtomicUsize::new(0));
    let s = settings(Arc::new(RecordingChat::default()));
    let mut index = VectorIndex::open(&s, IndexMode::Ephemeral).await.unwrap();

    let configs = [
        ConfluenceConfig::default(),
        ConfluenceConfig {
            api_token: None,
            ..confluence_config()
        },
    ];
    for config in &configs {
        let connect = |_: ConfluenceCredentials| {
            connects.fetch_add(1, Ordering::SeqCst);
            Ok(FakePages {
                calls: fetches.clone(),
            })
        };
        let err = ingest_space(config, connect, "ENG", None, &mut index, &Chunker::default())
            .await
            .unwrap_err();
        assert!(matches!(rag_error(&err), RagError::Config(_)));
        assert!(err.to_string().contains("CONFLUENCE_API_TOKEN"));

        let connect = |_: ConfluenceCredentials| {
            connects.fetch_add(1, Ordering::SeqCst);
            Ok(FakePages {
                calls: fetches.clone(),
            })
        };
        let err = ingest_pages(config, connect, &["123".to_string()], &mut index, &Chunker::default())
            .await
            .unwrap_err();
        assert!(matches!(rag_error(&err), RagError::Config(_)));
    }

    assert_eq!(connects.load(Ordering::SeqCst), 0);
    assert_eq!(fetches.load(Ordering::SeqCst), 0);
    assert_eq!(index.len(), 1);
}

#[tokio::test]
async fn test_confluence_space_chunks_carry_url() {
    let fetches = Arc::new(AtomicUsize::new(0));
    let s = settings(Arc::new(RecordingChat::default()));
    let mut index = VectorIndex::open(&s, IndexMode::Ephemeral).await.unwrap();

    let calls = fetches.clone();
    let count = ingest_space(
        &confluence_config(),
        move |creds| {
            assert_eq!(creds.url, "https://wiki.example.com");
            Ok(FakePages { calls })
        },
        "ENG",
        Some("label = runbook"),
        &mut index,
        &Chunker::default(),
    )
    .await
    .unwrap();

    assert_eq!(count, 1);
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
    let entry = &index.entries()[1];
    assert_eq!(
        entry.chunk.metadata.url.as_deref(),
        Some("https://wiki.example.com/spaces/ENG/pages/1/Keys")
    );
    assert_eq!(entry.chunk.metadata.source, entry.chunk.metadata.url);
}
