use clap::{Parser, Subcommand};
use mentorpay::application::checkout::{FlowEvent, PaymentFlow};
use mentorpay::application::poller::PollSchedule;
use mentorpay::application::session::SessionContext;
use mentorpay::application::wizard::FormField;
use mentorpay::config::{ClientConfig, DEFAULT_API_URL, DEFAULT_CREDENTIALS_PATH};
use mentorpay::domain::learning::{AssignmentQuery, AssignmentSubmission};
use mentorpay::domain::ports::{LearningApiRef, PaymentGatewayRef, SubscriptionApiRef};
use mentorpay::domain::session::{AuthToken, CachedUser};
use mentorpay::infrastructure::credentials::FileCredentialStore;
use mentorpay::infrastructure::http::HttpBackend;
use mentorpay::infrastructure::in_memory::InMemoryBackend;
use mentorpay::interfaces::csv::listing_writer::ListingWriter;
use miette::{IntoDiagnostic, Result, miette};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Base URL of the platform backend
    #[arg(long, env = "MENTORPAY_API_URL", default_value = DEFAULT_API_URL, global = true)]
    api_url: String,

    /// Where the session token is kept between runs
    #[arg(long, env = "MENTORPAY_CREDENTIALS", default_value = DEFAULT_CREDENTIALS_PATH, global = true)]
    credentials: PathBuf,

    /// Seconds between payment status checks
    #[arg(long, default_value_t = 5, global = true)]
    poll_interval_secs: u64,

    /// Stop waiting for a pending payment after this many seconds
    #[arg(long, global = true)]
    max_wait_secs: Option<u64>,

    /// HTTP request timeout in seconds
    #[arg(long, default_value_t = 30, global = true)]
    timeout_secs: u64,

    /// Run against a built-in scripted backend instead of the network
    #[arg(long, global = true)]
    demo: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List subscription plans
    Plans {
        /// Include inactive plans
        #[arg(long)]
        all: bool,
    },
    /// Store a session token
    Login {
        #[arg(long)]
        token: String,
        #[arg(long)]
        user_id: Option<u64>,
        #[arg(long)]
        email: Option<String>,
    },
    /// Forget the stored session
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Pay for a plan and activate the subscription
    Subscribe {
        #[arg(long)]
        plan: u64,
        /// Mpesa or Binance
        #[arg(long)]
        method: String,
        /// Phone number for Mpesa, Pay ID for Binance
        #[arg(long)]
        payer: String,
        /// Required for plans that are not online
        #[arg(long)]
        location: Option<String>,
    },
    /// Check a payment once
    Status { payment_id: String },
    /// List your assignments
    Assignments {
        #[arg(long)]
        status: Option<String>,
    },
    /// Upload a file and submit it for an assignment
    SubmitAssignment {
        #[arg(long)]
        id: u64,
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        comment: Option<String>,
    },
    /// List your live sessions
    LiveSessions,
    /// List your subscriptions
    MySubscriptions,
}

struct Backends {
    payments: PaymentGatewayRef,
    subscriptions: SubscriptionApiRef,
    learning: LearningApiRef,
}

impl Cli {
    fn config(&self) -> ClientConfig {
        ClientConfig {
            api_url: self.api_url.clone(),
            credentials_path: self.credentials.clone(),
            poll: PollSchedule {
                interval: Duration::from_secs(self.poll_interval_secs),
                max_wait: self.max_wait_secs.map(Duration::from_secs),
            },
            http_timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "mentorpay=debug" } else { "mentorpay=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

async fn backends(config: &ClientConfig, demo: bool) -> Result<Backends> {
    if demo {
        let backend = Arc::new(InMemoryBackend::demo().await);
        Ok(Backends {
            payments: backend.clone(),
            subscriptions: backend.clone(),
            learning: backend,
        })
    } else {
        let backend =
            Arc::new(HttpBackend::new(&config.api_url, config.http_timeout).into_diagnostic()?);
        Ok(Backends {
            payments: backend.clone(),
            subscriptions: backend.clone(),
            learning: backend,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = cli.config();
    config.validate().into_diagnostic()?;

    let backends = backends(&config, cli.demo).await?;
    let store = FileCredentialStore::new(&config.credentials_path);
    let session = Arc::new(SessionContext::load(Box::new(store)).await.into_diagnostic()?);

    match cli.command {
        Command::Plans { all } => {
            let mut plans = backends.subscriptions.public_plans().await.into_diagnostic()?;
            if !all {
                plans.retain(|p| p.is_active);
            }
            let stdout = io::stdout();
            ListingWriter::new(stdout.lock())
                .write_plans(&plans)
                .into_diagnostic()?;
        }
        Command::Login {
            token,
            user_id,
            email,
        } => {
            let parsed = AuthToken::parse(&token).into_diagnostic()?;
            let id = user_id
                .or(parsed.subject())
                .ok_or_else(|| miette!("token has no user id, pass --user-id"))?;
            let user = match email {
                Some(email) => CachedUser {
                    id,
                    email,
                    username: None,
                },
                None => {
                    let user = backends.learning.user(id, &token).await.into_diagnostic()?;
                    CachedUser {
                        id: user.id,
                        email: user.email,
                        username: Some(user.username).filter(|u| !u.is_empty()),
                    }
                }
            };
            session.login(&token, Some(user)).await.into_diagnostic()?;
            println!("Logged in as user {id}");
        }
        Command::Logout => {
            session.logout().await.into_diagnostic()?;
            println!("Logged out");
        }
        Command::Whoami => match session.user().await {
            Some(user) if session.is_authenticated().await => {
                println!("{} <{}>", user.id, user.email);
            }
            _ => return Err(miette!("not logged in")),
        },
        Command::Subscribe {
            plan,
            method,
            payer,
            location,
        } => {
            subscribe(&backends, session, config.poll, plan, method, payer, location).await?;
        }
        Command::Status { payment_id } => {
            let status = backends.payments.status(&payment_id).await.into_diagnostic()?;
            println!("{payment_id}: {status}");
        }
        Command::Assignments { status } => {
            let bearer = session.bearer().await.into_diagnostic()?;
            let query = AssignmentQuery {
                user_id: Some(session.user_id().await.into_diagnostic()?),
                status,
            };
            let assignments = backends
                .learning
                .assignments(&query, &bearer)
                .await
                .into_diagnostic()?;
            ListingWriter::new(io::stdout().lock())
                .write_assignments(&assignments)
                .into_diagnostic()?;
        }
        Command::SubmitAssignment { id, file, comment } => {
            let bearer = session.bearer().await.into_diagnostic()?;
            let uploaded = backends
                .learning
                .upload(&file, &bearer)
                .await
                .into_diagnostic()?;
            let submission = AssignmentSubmission::submitted(uploaded.first().map(|f| f.id), comment);
            let assignment = backends
                .learning
                .submit_assignment(id, &submission, &bearer)
                .await
                .into_diagnostic()?;
            println!("Assignment {} is now {}", assignment.id, assignment.status);
        }
        Command::LiveSessions => {
            let bearer = session.bearer().await.into_diagnostic()?;
            let user_id = session.user_id().await.into_diagnostic()?;
            let sessions = backends
                .learning
                .live_sessions(user_id, &bearer)
                .await
                .into_diagnostic()?;
            ListingWriter::new(io::stdout().lock())
                .write_live_sessions(&sessions)
                .into_diagnostic()?;
        }
        Command::MySubscriptions => {
            let bearer = session.bearer().await.into_diagnostic()?;
            let user_id = session.user_id().await.into_diagnostic()?;
            let subscriptions = backends
                .learning
                .user_subscriptions(user_id, &bearer)
                .await
                .into_diagnostic()?;
            ListingWriter::new(io::stdout().lock())
                .write_subscriptions(&subscriptions)
                .into_diagnostic()?;
        }
    }

    Ok(())
}

async fn subscribe(
    backends: &Backends,
    session: Arc<SessionContext>,
    schedule: PollSchedule,
    plan_id: u64,
    method: String,
    payer: String,
    location: Option<String>,
) -> Result<()> {
    let plan = backends
        .subscriptions
        .public_plans()
        .await
        .into_diagnostic()?
        .into_iter()
        .find(|p| p.id == plan_id && p.is_active)
        .ok_or_else(|| miette!("no active plan with id {plan_id}"))?;

    let (flow, mut events) = PaymentFlow::new(
        backends.payments.clone(),
        backends.subscriptions.clone(),
        session,
        schedule,
    );
    flow.open(plan).await;
    flow.set_field(FormField::PaymentMethod, method).await;
    flow.set_field(FormField::Location, location.unwrap_or_default()).await;
    flow.next_step().await.into_diagnostic()?;
    flow.set_field(FormField::PayerIdentifier, payer).await;
    flow.initiate().await.into_diagnostic()?;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                if report(&event) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                flow.close().await;
                return Err(miette!("checkout interrupted, payment status unknown"));
            }
        }
    }

    match flow.snapshot().await.outcome {
        Some(outcome) if outcome.is_success() => {
            println!("{outcome}");
            Ok(())
        }
        Some(outcome) => Err(miette!("{outcome}")),
        None => Err(miette!("checkout ended without an outcome")),
    }
}

/// Prints progress for one event. Returns `true` once the checkout is over.
fn report(event: &FlowEvent) -> bool {
    match event {
        FlowEvent::Initiated {
            payment_id,
            method,
            qr_code_url,
            checkout_url,
        } => {
            eprintln!("{method} payment {payment_id} started, waiting for confirmation");
            if let Some(url) = checkout_url {
                eprintln!("Complete the payment at {url}");
            }
            if let Some(url) = qr_code_url {
                eprintln!("QR code: {url}");
            }
            false
        }
        FlowEvent::StatusChecked { status, .. } => {
            eprintln!("Payment status: {status}");
            false
        }
        FlowEvent::StatusCheckFailed { reason, .. } => {
            eprintln!("Could not check payment status: {reason}");
            false
        }
        FlowEvent::InitiationFailed { .. } | FlowEvent::Closed => true,
        FlowEvent::Activated { .. }
        | FlowEvent::ActivationFailed { .. }
        | FlowEvent::PaymentFailed { .. }
        | FlowEvent::PaymentCanceled { .. }
        | FlowEvent::TimedOut { .. } => true,
    }
}
