//! Test Support
//!
//! Hand-rolled mock collaborators and a pre-wired context for exercising
//! the daemon and tasks without any network or sandbox.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::bail;
use async_trait::async_trait;

use crate::heartbeat::tasks::TaskContext;
use crate::state::{shared, Database};
use crate::types::{
    AgentIdentity, ChainBalances, ChainClient, ChatMessage, CreditsClient, ExecResult,
    InferenceClient, InferenceResponse, MessagingClient, PollResponse, SandboxClient,
    SourceControlClient, TokenUsage, UpstreamStatus,
};

// ─── Credits ─────────────────────────────────────────────────────

pub struct MockCreditsClient {
    balance_cents: AtomicI64,
    failing: AtomicBool,
}

impl MockCreditsClient {
    pub fn new(balance_cents: i64) -> Arc<Self> {
        Arc::new(Self {
            balance_cents: AtomicI64::new(balance_cents),
            failing: AtomicBool::new(false),
        })
    }

    pub fn set_balance(&self, cents: i64) {
        self.balance_cents.store(cents, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl CreditsClient for MockCreditsClient {
    async fn get_credits_balance(&self) -> anyhow::Result<i64> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("simulated balance outage");
        }
        Ok(self.balance_cents.load(Ordering::SeqCst))
    }
}

// ─── Chain ───────────────────────────────────────────────────────

pub struct MockChainClient {
    balances: Mutex<ChainBalances>,
    failing: AtomicBool,
}

impl MockChainClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            balances: Mutex::new(ChainBalances {
                settled_usdc: 0.0,
                fee_native: 0.05,
            }),
            failing: AtomicBool::new(false),
        })
    }

    pub fn set_balances(&self, balances: ChainBalances) {
        *self.balances.lock().unwrap() = balances;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn get_chain_balances(&self) -> anyhow::Result<ChainBalances> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("simulated rpc outage");
        }
        Ok(*self.balances.lock().unwrap())
    }
}

// ─── Inference ───────────────────────────────────────────────────

pub struct MockInferenceClient {
    default_model: String,
    low_compute: AtomicBool,
}

impl MockInferenceClient {
    pub fn new(default_model: &str) -> Self {
        Self {
            default_model: default_model.to_string(),
            low_compute: AtomicBool::new(false),
        }
    }

    pub fn new_shared(default_model: &str) -> Arc<Self> {
        Arc::new(Self::new(default_model))
    }

    pub fn low_compute_enabled(&self) -> bool {
        self.low_compute.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceClient for MockInferenceClient {
    async fn chat(&self, _messages: Vec<ChatMessage>) -> anyhow::Result<InferenceResponse> {
        Ok(InferenceResponse {
            id: "mock".to_string(),
            model: self.current_model(),
            content: "ok".to_string(),
            usage: TokenUsage::default(),
            finish_reason: "stop".to_string(),
        })
    }

    fn set_low_compute_mode(&self, enabled: bool) {
        self.low_compute.store(enabled, Ordering::SeqCst);
    }

    fn current_model(&self) -> String {
        if self.low_compute_enabled() {
            crate::survival::LOW_COMPUTE_MODEL.to_string()
        } else {
            self.default_model.clone()
        }
    }
}

// ─── Messaging ───────────────────────────────────────────────────

pub struct MockMessagingClient {
    responses: Mutex<VecDeque<PollResponse>>,
    last_cursor: Mutex<Option<String>>,
    failing: AtomicBool,
}

impl MockMessagingClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(VecDeque::new()),
            last_cursor: Mutex::new(None),
            failing: AtomicBool::new(false),
        })
    }

    pub fn push_response(&self, response: PollResponse) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn last_cursor(&self) -> Option<String> {
        self.last_cursor.lock().unwrap().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessagingClient for MockMessagingClient {
    async fn poll(&self, cursor: Option<&str>, _limit: u32) -> anyhow::Result<PollResponse> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("simulated relay outage");
        }
        *self.last_cursor.lock().unwrap() = cursor.map(str::to_string);
        Ok(self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(PollResponse {
                messages: vec![],
                next_cursor: None,
            }))
    }
}

// ─── Source Control ──────────────────────────────────────────────

pub struct MockSourceControlClient {
    status: Mutex<UpstreamStatus>,
    failing: AtomicBool,
}

impl MockSourceControlClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            status: Mutex::new(UpstreamStatus::default()),
            failing: AtomicBool::new(false),
        })
    }

    pub fn set_status(&self, status: UpstreamStatus) {
        *self.status.lock().unwrap() = status;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl SourceControlClient for MockSourceControlClient {
    async fn check_upstream(&self) -> anyhow::Result<UpstreamStatus> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("simulated git outage");
        }
        Ok(self.status.lock().unwrap().clone())
    }
}

// ─── Sandbox ─────────────────────────────────────────────────────

pub struct MockSandboxClient {
    exit_code: AtomicI32,
    failing: AtomicBool,
    pub commands: Mutex<Vec<String>>,
    files: Mutex<HashMap<String, String>>,
}

impl MockSandboxClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            exit_code: AtomicI32::new(0),
            failing: AtomicBool::new(false),
            commands: Mutex::new(Vec::new()),
            files: Mutex::new(HashMap::new()),
        })
    }

    pub fn set_exit_code(&self, code: i32) {
        self.exit_code.store(code, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn seed_file(&self, path: &str, content: &str) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), content.to_string());
    }

    pub fn file_content(&self, path: &str) -> Option<String> {
        self.files.lock().unwrap().get(path).cloned()
    }
}

#[async_trait]
impl SandboxClient for MockSandboxClient {
    async fn exec(&self, command: &str, _timeout_ms: Option<u64>) -> anyhow::Result<ExecResult> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("simulated sandbox outage");
        }
        self.commands.lock().unwrap().push(command.to_string());
        let exit_code = self.exit_code.load(Ordering::SeqCst);
        Ok(ExecResult {
            stdout: if exit_code == 0 { "ok\n".into() } else { String::new() },
            stderr: if exit_code == 0 {
                String::new()
            } else {
                "probe failed\n".into()
            },
            exit_code,
        })
    }

    async fn write_file(&self, path: &str, content: &str) -> anyhow::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("simulated sandbox outage");
        }
        self.seed_file(path, content);
        Ok(())
    }

    async fn read_file(&self, path: &str) -> anyhow::Result<String> {
        match self.file_content(path) {
            Some(content) => Ok(content),
            None => bail!("no such file: {path}"),
        }
    }
}

// ─── Pre-wired context ───────────────────────────────────────────

/// A full task context over an in-memory database, with handles to every
/// mock so tests can steer collaborator behavior.
pub struct TestRig {
    pub ctx: TaskContext,
    pub credits: Arc<MockCreditsClient>,
    pub chain: Arc<MockChainClient>,
    pub inference: Arc<MockInferenceClient>,
    pub messaging: Arc<MockMessagingClient>,
    pub source_control: Arc<MockSourceControlClient>,
    pub sandbox: Arc<MockSandboxClient>,
}

impl TestRig {
    pub fn new() -> Self {
        let db = shared(Database::open_in_memory().expect("in-memory db"));
        let credits = MockCreditsClient::new(500);
        let chain = MockChainClient::new();
        let inference = MockInferenceClient::new_shared("gpt-4o");
        let messaging = MockMessagingClient::new();
        let source_control = MockSourceControlClient::new();
        let sandbox = MockSandboxClient::new();

        let ctx = TaskContext {
            identity: AgentIdentity {
                name: "test-agent".to_string(),
                address: "0x00000000000000000000000000000000000000aa".to_string(),
                created_at: "2026-01-01T00:00:00Z".to_string(),
            },
            version: "0.1.0".to_string(),
            db,
            credits: credits.clone(),
            chain: chain.clone(),
            inference: inference.clone(),
            messaging: Some(messaging.clone()),
            source_control: source_control.clone(),
            sandbox: sandbox.clone(),
            started_at: Instant::now(),
        };

        Self {
            ctx,
            credits,
            chain,
            inference,
            messaging,
            source_control,
            sandbox,
        }
    }
}
