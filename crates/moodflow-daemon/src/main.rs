use moodflow_daemon::{audio, core, generation, http};
use moodflow_proto::config::Config;
use moodflow_proto::credentials::CredentialStore;
use moodflow_proto::protocol::StatusMessage;
use moodflow_proto::state::StateManager;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// A custom tracing layer that forwards log messages to the broadcast channel
struct BroadcastLayer {
    sender: broadcast::Sender<StatusMessage>,
}

impl BroadcastLayer {
    fn new(sender: broadcast::Sender<StatusMessage>) -> Self {
        Self { sender }
    }
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        // Only forward WARN and ERROR to avoid clogging the channel
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = String::new();

        let now = chrono::Local::now();
        message.push_str(&format!("{} ", now.format("%H:%M:%S")));
        message.push_str(&format!("[{}] ", level));

        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        // Send to broadcast channel (ignore errors - no receivers is OK)
        let _ = self.sender.send(StatusMessage::Log { message });
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for MessageVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Setup broadcast channel first so we can use it for logging
    let (broadcast_tx, _) = broadcast::channel::<StatusMessage>(100);

    // Setup file logging + broadcast layer
    let data_dir = moodflow_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("daemon.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    let broadcast_layer = BroadcastLayer::new(broadcast_tx.clone());

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(broadcast_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,moodflow_daemon=debug")
            }),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    let credentials = Arc::new(CredentialStore::new(config.daemon.credential_file.clone()));
    if credentials.load() {
        info!("API credential loaded from disk");
    } else {
        info!("No API credential on disk yet");
    }

    let state = StateManager::new();
    state.set_credential_set(credentials.has()).await;

    // Event channel — all external inputs funnel into the player core
    let (event_tx, event_rx) = mpsc::channel::<core::CoreEvent>(256);

    // Audio events are translated onto the core event channel
    let (player_tx, mut player_rx) = mpsc::channel::<audio::PlayerEvent>(64);
    {
        let event_tx = event_tx.clone();
        tokio::spawn(async move {
            while let Some(evt) = player_rx.recv().await {
                if event_tx.send(core::CoreEvent::Player(evt)).await.is_err() {
                    break;
                }
            }
        });
    }

    let player = audio::MpvPlayer::new(player_tx, config.player.volume);

    // Fetch worker: runs generations off the core loop so a slow poll
    // cycle never blocks commands
    let (fetch_tx, mut fetch_rx) = mpsc::channel::<core::FetchRequest>(16);
    let client = generation::GenerationClient::new(&config.api, credentials.clone())?;
    {
        let event_tx = event_tx.clone();
        tokio::spawn(async move {
            while let Some(req) = fetch_rx.recv().await {
                let client = client.clone();
                let event_tx = event_tx.clone();
                tokio::spawn(async move {
                    let result = client.generate(req.mood.slug()).await;
                    let _ = event_tx
                        .send(core::CoreEvent::Generated {
                            session: req.session,
                            purpose: req.purpose,
                            result,
                        })
                        .await;
                });
            }
        });
    }

    if config.http.enabled {
        let _http_handle = http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            state.clone(),
            event_tx.clone(),
        );
    }

    let core = core::PlayerCore::new(
        &config.player,
        player,
        credentials,
        state,
        broadcast_tx,
        fetch_tx,
        event_tx,
    );
    core.run(event_rx).await;

    Ok(())
}
