//! Full-stack tests: enqueue through the public queue, process with the
//! worker pool against a scripted engine, observe results on the job row
//! and the conversation transcript.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use llamalith::config::Config;
use llamalith::db::job_repo::{JobRow, JobStatus};
use llamalith::db::{conversation_repo, Database};
use llamalith::engine::{
    Completion, EngineError, EnginePool, FinishReason, InferenceEngine, InvocationRequest,
};
use llamalith::prompt::Role;
use llamalith::queue::{JobRequest, Queue};
use llamalith::worker::WorkerPool;

/// Engine that replays scripted responses (or failures) in order.
struct ScriptedEngine {
    script: Mutex<Vec<Result<String, String>>>,
    calls: AtomicU32,
}

impl ScriptedEngine {
    fn new(script: Vec<Result<String, String>>) -> Self {
        let mut script = script;
        script.reverse();
        Self {
            script: Mutex::new(script),
            calls: AtomicU32::new(0),
        }
    }
}

impl InferenceEngine for ScriptedEngine {
    fn count_tokens(&self, text: &str) -> Result<usize, EngineError> {
        Ok(text.len() / 4)
    }

    fn context_window(&self) -> u32 {
        8192
    }

    fn complete(&self, _request: &InvocationRequest) -> Result<Completion, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .unwrap()
            .pop()
            .expect("script exhausted");
        match next {
            Ok(text) => Ok(Completion {
                text,
                finish: FinishReason::Stop,
                generated_tokens: None,
            }),
            Err(message) => Err(EngineError::Inference(message)),
        }
    }
}

fn config(model_json: &str) -> Arc<Config> {
    let json = format!(
        r#"{{
            "version": "1.0",
            "worker_count": 2,
            "poll_interval_ms": 20,
            "error_backoff_ms": 10,
            "models": {{ "mistral": {} }}
        }}"#,
        model_json
    );
    Arc::new(serde_json::from_str(&json).unwrap())
}

fn pool_with_script(script: Vec<Result<String, String>>) -> Arc<EnginePool> {
    let engine = Arc::new(ScriptedEngine::new(script));
    Arc::new(EnginePool::with_factory(Box::new(move |_, _| {
        Ok(Arc::clone(&engine) as Arc<dyn InferenceEngine>)
    })))
}

fn request(input: &str) -> JobRequest {
    JobRequest {
        conversation_id: "c1".to_string(),
        input: input.to_string(),
        model: "mistral".to_string(),
        system_prompt: Some("You are helpful.".to_string()),
        grammar: None,
    }
}

fn wait_for_terminal(queue: &Queue, id: i64) -> JobRow {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let job = queue.get_job(id).unwrap().unwrap();
        match job.status {
            JobStatus::Done | JobStatus::Error => return job,
            _ if Instant::now() > deadline => panic!("job {} never reached a terminal state", id),
            _ => thread::sleep(Duration::from_millis(10)),
        }
    }
}

fn run_single_job(
    model_json: &str,
    script: Vec<Result<String, String>>,
    req: JobRequest,
) -> (Database, Queue, JobRow) {
    let db = Database::open_in_memory().unwrap();
    let (wake_tx, wake_rx) = crossbeam_channel::unbounded();
    let queue = Queue::with_waker(db.clone(), wake_tx);

    let pool = WorkerPool::start(
        db.clone(),
        config(model_json),
        pool_with_script(script),
        wake_rx,
    )
    .unwrap();

    let id = queue.enqueue(&req).unwrap();
    let job = wait_for_terminal(&queue, id);

    pool.shutdown();
    pool.wait();
    (db, queue, job)
}

#[test]
fn test_successful_job_records_result_and_transcript() {
    let (db, _queue, job) = run_single_job(
        r#"{ "model_path": "m.gguf" }"#,
        vec![Ok("Hi there".to_string())],
        request("Hello"),
    );

    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(job.result.as_deref(), Some("Hi there"));
    assert!(!job.forced_completion);
    assert!(job.processed_at.is_some());

    // Transcript holds system, user and assistant turns in order.
    let messages = conversation_repo::list(&db, "c1").unwrap();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0].role, Role::System);
    assert_eq!(messages[1].role, Role::User);
    assert_eq!(messages[1].content, "Hello");
    assert_eq!(messages[2].role, Role::Assistant);
    assert_eq!(messages[2].content, "Hi there");
}

#[test]
fn test_engine_failure_marks_job_error_without_assistant_turn() {
    let (db, _queue, job) = run_single_job(
        r#"{ "model_path": "m.gguf" }"#,
        vec![Err("backend crashed".to_string())],
        request("Hello"),
    );

    assert_eq!(job.status, JobStatus::Error);
    let message = job.result.expect("error jobs carry a message");
    assert!(!message.is_empty());
    assert!(message.contains("backend crashed"));

    let messages = conversation_repo::list(&db, "c1").unwrap();
    assert!(messages.iter().all(|m| m.role != Role::Assistant));
}

#[test]
fn test_empty_output_marks_job_error() {
    let (_db, _queue, job) = run_single_job(
        r#"{ "model_path": "m.gguf" }"#,
        vec![Ok("   ".to_string())],
        request("Hello"),
    );

    assert_eq!(job.status, JobStatus::Error);
    assert!(job.result.unwrap().contains("empty output"));
}

#[test]
fn test_forced_completion_is_visible_on_the_job() {
    // The model never produces the terminator, so after the attempt
    // budget it is appended and the job flagged.
    let (_db, _queue, job) = run_single_job(
        r#"{ "model_path": "m.gguf", "terminator": { "text": "[DONE]", "max_attempts": 1 } }"#,
        vec![Ok("part one".to_string()), Ok(" part two".to_string())],
        request("Hello"),
    );

    assert_eq!(job.status, JobStatus::Done);
    assert!(job.forced_completion);
    let result = job.result.unwrap();
    assert!(result.ends_with("[DONE]"));
    assert_eq!(result.matches("[DONE]").count(), 1);
}

#[test]
fn test_jobs_across_conversations_all_complete() {
    let db = Database::open_in_memory().unwrap();
    let (wake_tx, wake_rx) = crossbeam_channel::unbounded();
    let queue = Queue::with_waker(db.clone(), wake_tx);

    let script: Vec<Result<String, String>> =
        (0..6).map(|i| Ok(format!("reply {}", i))).collect();
    let pool = WorkerPool::start(
        db.clone(),
        config(r#"{ "model_path": "m.gguf" }"#),
        pool_with_script(script),
        wake_rx,
    )
    .unwrap();

    let ids: Vec<i64> = (0..6)
        .map(|i| {
            queue
                .enqueue(&JobRequest {
                    conversation_id: format!("c{}", i),
                    input: format!("question {}", i),
                    model: "mistral".to_string(),
                    system_prompt: None,
                    grammar: None,
                })
                .unwrap()
        })
        .collect();

    for id in ids {
        let job = wait_for_terminal(&queue, id);
        assert_eq!(job.status, JobStatus::Done);
        assert!(job.result.is_some());
    }

    pool.shutdown();
    pool.wait();
}
