//! Interactive authorization-code login
//!
//! ```text
//! Idle ─▶ AwaitingCallback ─┬─▶ Succeeded
//!                           ├─▶ Failed     (provider error, state mismatch, exchange error)
//!                           └─▶ Canceled   (caller, user, deadline)
//! ```
//!
//! In [`LoginMode::Callback`] the code arrives at a local listener, which is
//! stopped on every terminal transition. In [`LoginMode::Poll`] the CLI
//! long-polls the provider instead; a `408` just means "not yet". A flow runs
//! once; retrying means building a new flow with fresh state and PKCE.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::callback::CallbackListener;
use super::client::{AuthClient, AuthorizeOptions, ResponseType, Tokens};
use crate::{Error, Result};

/// Default time the user has to finish logging in
pub const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Where a login attempt is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    /// Not started
    Idle,
    /// URL shown, waiting for the browser
    AwaitingCallback,
    /// Tokens obtained
    Succeeded,
    /// Provider error, state mismatch, or code exchange failure
    Failed,
    /// Canceled by the caller, the user, or the deadline
    Canceled,
}

impl LoginState {
    /// `true` for states the flow never leaves
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

/// How the authorization code gets back to the CLI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoginMode {
    /// The provider redirects the browser to a listener on `127.0.0.1`
    #[default]
    Callback,
    /// The provider keeps the code and the CLI long-polls for it; works
    /// where the browser cannot reach the CLI's machine
    Poll,
}

/// Login flow settings
#[derive(Debug, Clone)]
pub struct LoginOptions {
    /// Code delivery
    pub mode: LoginMode,
    /// Callback port; 0 picks an ephemeral one (callback mode only)
    pub port: u16,
    /// Use PKCE
    pub pkce: bool,
    /// Upstream provider hint
    pub provider: Option<String>,
    /// Open the authorize URL in the default browser
    pub open_browser: bool,
    /// Read ENTER (re-open browser) and `q` (cancel) from stdin
    pub interactive: bool,
    /// Give up after this long
    pub timeout: Duration,
}

impl Default for LoginOptions {
    fn default() -> Self {
        Self {
            mode: LoginMode::Callback,
            port: 0,
            pkce: true,
            provider: None,
            open_browser: true,
            interactive: false,
            timeout: DEFAULT_LOGIN_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PromptAction {
    OpenBrowser,
    Quit,
}

/// One interactive login attempt
pub struct LoginFlow {
    client: AuthClient,
    options: LoginOptions,
    state: watch::Sender<LoginState>,
}

impl LoginFlow {
    /// Prepare a login against `client`'s provider
    #[must_use]
    pub fn new(client: AuthClient, options: LoginOptions) -> Self {
        let (state, _) = watch::channel(LoginState::Idle);
        Self { client, options, state }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> LoginState {
        *self.state.borrow()
    }

    /// Observe state transitions
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LoginState> {
        self.state.subscribe()
    }

    /// Run the flow to completion and return the provider's tokens.
    ///
    /// Returns [`Error::Canceled`] when `cancel` fires, the user quits, or
    /// the timeout elapses.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<Tokens> {
        if self.state() != LoginState::Idle {
            return Err(Error::Internal("login flow already used".to_string()));
        }

        let result = self.run_inner(cancel).await;
        self.state.send_replace(match &result {
            Ok(_) => LoginState::Succeeded,
            Err(Error::Canceled(_)) => LoginState::Canceled,
            Err(_) => LoginState::Failed,
        });
        result
    }

    async fn run_inner(&self, cancel: &CancellationToken) -> Result<Tokens> {
        let options = AuthorizeOptions {
            pkce: self.options.pkce,
            provider: self.options.provider.clone(),
        };

        let (code, authorize) = match self.options.mode {
            LoginMode::Callback => {
                let listener = CallbackListener::bind(self.options.port).await?;
                let authorize = self
                    .client
                    .authorize(&listener.redirect_uri(), ResponseType::Code, &options)?;

                let mut server = listener.serve(authorize.state.clone(), &authorize.url);
                let outcome = self.wait_for_code(server.code(), &authorize.url, cancel).await;
                server.shutdown().await;
                (outcome, authorize)
            }
            LoginMode::Poll => {
                let authorize = self
                    .client
                    .authorize(&self.client.poll_redirect_uri(), ResponseType::Code, &options)?;

                let poll = async {
                    loop {
                        if let Some(code) = self.client.poll(&authorize.state).await? {
                            return Ok::<_, Error>(code);
                        }
                        debug!("Poll timed out, retrying");
                    }
                };
                let outcome = self.wait_for_code(poll, &authorize.url, cancel).await;
                (outcome, authorize)
            }
        };

        let code = code?;
        debug!("Authorization code received, exchanging");
        let tokens = self
            .client
            .exchange(&code, &authorize.redirect_uri, authorize.verifier.as_deref())
            .await?;
        info!("Login succeeded");
        Ok(tokens)
    }

    /// Show the authorize URL and race `code` against cancellation, the
    /// deadline and the interactive prompt.
    async fn wait_for_code<F>(&self, code: F, url: &Url, cancel: &CancellationToken) -> Result<String>
    where
        F: Future<Output = Result<String>>,
    {
        self.state.send_replace(LoginState::AwaitingCallback);

        println!("\nPlease visit the authorization URL to log in:\n{url}\n");
        if self.options.interactive {
            println!("(Press ENTER to open the browser, or type q and ENTER to cancel)");
        }
        if self.options.open_browser {
            open_browser(url.as_str());
        }

        let (mut prompt, prompt_task) = if self.options.interactive {
            let (rx, task) = spawn_prompt();
            (Some(rx), Some(task))
        } else {
            (None, None)
        };

        let deadline = tokio::time::sleep(self.options.timeout);
        tokio::pin!(deadline);
        tokio::pin!(code);

        let outcome = loop {
            tokio::select! {
                result = &mut code => break result,
                () = cancel.cancelled() => break Err(Error::Canceled("canceled by caller".to_string())),
                () = &mut deadline => break Err(Error::Canceled(format!(
                    "timed out after {}",
                    humantime_serde::re::humantime::format_duration(self.options.timeout)
                ))),
                action = next_prompt(&mut prompt) => match action {
                    PromptAction::OpenBrowser => open_browser(url.as_str()),
                    PromptAction::Quit => break Err(Error::Canceled("canceled by user".to_string())),
                },
            }
        };

        if let Some(task) = prompt_task {
            task.abort();
        }
        outcome
    }
}

fn open_browser(url: &str) {
    if let Err(e) = open::that(url) {
        warn!(error = %e, "Failed to open browser");
    }
}

fn spawn_prompt() -> (mpsc::Receiver<PromptAction>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(4);
    let task = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(parse_prompt(&line)).await.is_err() {
                break;
            }
        }
    });
    (rx, task)
}

fn parse_prompt(line: &str) -> PromptAction {
    if line.trim().eq_ignore_ascii_case("q") {
        PromptAction::Quit
    } else {
        PromptAction::OpenBrowser
    }
}

/// Next prompt action; pends forever without a prompt or after stdin closes.
async fn next_prompt(prompt: &mut Option<mpsc::Receiver<PromptAction>>) -> PromptAction {
    if let Some(rx) = prompt
        && let Some(action) = rx.recv().await
    {
        return action;
    }
    *prompt = None;
    std::future::pending().await
}
