use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use crossbeam_channel::{Receiver, Sender};

use facegate_core::auth::auth_session::AuthSession;
use facegate_core::auth::credentials::{self, Registration};
use facegate_core::camera::infrastructure::image_sequence_device::ImageSequenceDevice;
use facegate_core::capture::still_image::StillImage;
use facegate_core::detection::infrastructure::model_resolver::ModelSource;
use facegate_core::detection::infrastructure::onnx_model_loader::OnnxModelLoader;
use facegate_core::flow::face_screen::{FaceScreen, ScreenContext, ScreenError, ScreenOptions};
use facegate_core::flow::notifier::{LogNotifier, Notice, Notifier};
use facegate_core::shared::settings::Settings;
use facegate_core::verification::domain::identity::SessionIdentity;
use facegate_core::verification::domain::navigator::{Navigator, Route};
use facegate_core::verification::infrastructure::http_face_backend::HttpFaceBackend;
use facegate_core::verification::verification_session::{AttemptKind, SessionState};

/// Password plus face sign-in against a FaceGate service.
#[derive(Parser)]
#[command(name = "facegate")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory of still images replayed as the camera.
    #[arg(long, global = true)]
    frames: Option<PathBuf>,

    /// Frames the camera takes to warm up before producing images.
    #[arg(long, global = true, default_value = "0")]
    warmup: usize,

    /// Service base URL (overrides settings).
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Directory holding the face detection model.
    #[arg(long, global = true)]
    models_dir: Option<PathBuf>,

    /// Base URL to download the face detection model from.
    #[arg(long, global = true, conflicts_with = "models_dir")]
    models_url: Option<String>,

    /// Face detection score threshold (0.0-1.0).
    #[arg(long, global = true)]
    confidence: Option<f64>,

    /// Seconds to wait for exactly one face before giving up.
    #[arg(long, global = true, default_value = "30")]
    face_timeout: u64,

    /// Face attempts before giving up and returning to login.
    #[arg(long, global = true, default_value = "3")]
    attempts: u32,

    /// Write each captured still to this file.
    #[arg(long, global = true)]
    save_capture: Option<PathBuf>,

    /// Persist the effective settings for later runs.
    #[arg(long, global = true)]
    save_settings: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Create an account, then enroll a face for it.
    Register {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        /// Defaults to --password.
        #[arg(long)]
        confirm_password: Option<String>,
    },
    /// Sign in with a password, then verify the face.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
}

/// Hands routes from the face screen to the main thread.
struct ChannelNavigator {
    routes: Sender<Route>,
}

impl Navigator for ChannelNavigator {
    fn navigate(&self, route: Route) {
        let _ = self.routes.send(route);
    }
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let frames = validate(&cli)?;
    let settings = effective_settings(&cli);
    if cli.save_settings {
        settings.save()?;
        log::info!("Settings saved");
    }

    let backend = Arc::new(HttpFaceBackend::new(
        &settings.api_url,
        settings.request_timeout(),
    )?);
    let auth = Arc::new(AuthSession::new());
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);

    let (kind, identity) = match &cli.command {
        Command::Register {
            username,
            email,
            password,
            confirm_password,
        } => {
            let registration = Registration {
                username: username.clone(),
                email: email.clone(),
                password: password.clone(),
                confirm_password: confirm_password.clone().unwrap_or_else(|| password.clone()),
            };
            let identity = credentials::register(backend.as_ref(), &registration)?;
            notifier.notify(Notice::info(
                "Account Created!",
                "Please register your face to complete setup",
            ));
            (AttemptKind::Enroll, identity)
        }
        Command::Login { email, password } => {
            let identity = credentials::login(backend.as_ref(), &auth, email, password)?;
            notifier.notify(Notice::info(
                "Login Successful!",
                "Proceeding to face verification...",
            ));
            (AttemptKind::Verify, identity)
        }
    };

    let (routes_tx, routes_rx) = crossbeam_channel::unbounded();
    let context = ScreenContext {
        devices: Arc::new(ImageSequenceDevice::new(frames).with_warmup(cli.warmup)),
        backend: backend.clone(),
        navigator: Arc::new(ChannelNavigator { routes: routes_tx }),
        notifier: notifier.clone(),
        auth: Some(auth.clone()),
    };
    let loader = OnnxModelLoader::new(settings.models.clone()).with_progress(download_progress);
    let options = ScreenOptions::from(&settings);

    let mut screen = FaceScreen::mount(kind, Some(identity), &loader, &context, &options)?;
    let route = drive(&screen, &routes_rx, &cli, &settings);
    screen.teardown();

    match route? {
        Route::Dashboard { identity } => {
            show_dashboard(&identity, &auth, &backend);
            log_out(&auth, notifier.as_ref());
        }
        Route::Login {
            notice: Some(notice),
        } => println!("{notice}"),
        Route::Login { notice: None } => println!("Returned to login"),
    }
    Ok(())
}

/// Captures whenever the gate allows it until the screen navigates away.
fn drive(
    screen: &FaceScreen,
    routes: &Receiver<Route>,
    cli: &Cli,
    settings: &Settings,
) -> Result<Route, Box<dyn std::error::Error>> {
    let face_timeout = Duration::from_secs(cli.face_timeout);
    let resolve_timeout = settings.request_timeout() + Duration::from_secs(1);
    let route_timeout = settings.grace_delay() + Duration::from_secs(5);
    let mut attempts_left = cli.attempts;

    loop {
        if let Ok(route) = routes.try_recv() {
            return Ok(route);
        }

        match screen.session().state() {
            SessionState::Idle => {
                if !screen.signals().wait_until_allowed(face_timeout) {
                    return Err(format!(
                        "No capture within {}s: {}",
                        cli.face_timeout,
                        screen.status()
                    )
                    .into());
                }
                match screen.capture() {
                    Ok(()) => attempts_left = attempts_left.saturating_sub(1),
                    Err(ScreenError::Capture(e)) => {
                        log::debug!("Capture skipped: {e}");
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                }
                if let (Some(path), Some(still)) = (&cli.save_capture, screen.session().still()) {
                    save_capture(path, &still)?;
                }
                eprintln!("{}", screen.status());
                screen.session().wait_until_resolved(resolve_timeout);
            }
            SessionState::Submitting => {
                screen.session().wait_until_resolved(resolve_timeout);
            }
            SessionState::Success { .. } => {
                eprintln!("{}", screen.status());
                return Ok(routes.recv_timeout(route_timeout)?);
            }
            SessionState::Failure { .. } => {
                eprintln!("{}", screen.status());
                if attempts_left == 0 {
                    if screen.session().kind() == AttemptKind::Enroll {
                        return Err(format!("Face enrollment failed: {}", screen.status()).into());
                    }
                    screen.abandon()?;
                    return Ok(routes.recv_timeout(route_timeout)?);
                }
                eprintln!("Retrying ({attempts_left} attempt(s) left)");
                screen.retry()?;
            }
        }
    }
}

fn show_dashboard(identity: &SessionIdentity, auth: &AuthSession, backend: &HttpFaceBackend) {
    println!("Welcome, {}!", identity.username);
    println!("  User ID:   {}", identity.user_id);
    println!("  Email:     {}", identity.email);
    println!(
        "  Face data: {}",
        if identity.has_face_data {
            "enrolled"
        } else {
            "not enrolled"
        }
    );

    if let Some(token) = auth.bearer_token() {
        match backend.profile(&token) {
            Ok(profile) => log::info!("Profile: {profile:?}"),
            Err(e) => log::warn!("Could not fetch profile: {e}"),
        }
    }
}

/// The run ends at the dashboard, so the sign-in does not outlive it.
fn log_out(auth: &AuthSession, notifier: &dyn Notifier) {
    auth.clear();
    notifier.notify(Notice::info(
        "Logged Out",
        "You have been successfully logged out.",
    ));
}

fn effective_settings(cli: &Cli) -> Settings {
    let mut settings = Settings::load();
    if let Some(url) = &cli.api_url {
        settings.api_url = url.clone();
    }
    if let Some(dir) = &cli.models_dir {
        settings.models = ModelSource::Directory(dir.clone());
    }
    if let Some(url) = &cli.models_url {
        settings.models = ModelSource::Url(url.clone());
    }
    if let Some(confidence) = cli.confidence {
        settings.detector.score_threshold = confidence;
    }
    settings
}

/// Checked before any request reaches the service, so a bad invocation
/// never leaves a half-registered account behind.
fn validate(cli: &Cli) -> Result<&Path, Box<dyn std::error::Error>> {
    let frames = cli.frames.as_deref().ok_or("--frames is required")?;
    if !frames.is_dir() {
        return Err(format!("Frames directory not found: {}", frames.display()).into());
    }
    if let Some(confidence) = cli.confidence {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(
                format!("Confidence must be between 0.0 and 1.0, got {confidence}").into(),
            );
        }
    }
    if cli.attempts == 0 {
        return Err("--attempts must be at least 1".into());
    }
    Ok(frames)
}

fn save_capture(path: &Path, still: &StillImage) -> Result<(), Box<dyn std::error::Error>> {
    still.save(path)?;
    log::info!("Capture written to {}", path.display());
    Ok(())
}

fn download_progress(downloaded: u64, total: u64) {
    if total > 0 {
        let pct = (downloaded as f64 / total as f64 * 100.0) as u32;
        eprint!("\rDownloading face detection model... {pct}%");
    } else {
        eprint!("\rDownloading face detection model... {downloaded} bytes");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facegate_core::flow::notifier::Severity;
    use std::sync::Mutex;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["facegate"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_missing_frames_fails_validation_before_any_request() {
        let cli = parse(&["login", "--email", "ada@example.com", "--password", "secret"]);
        let err = validate(&cli).unwrap_err();
        assert_eq!(err.to_string(), "--frames is required");
    }

    #[test]
    fn test_frames_must_be_a_directory() {
        let cli = parse(&[
            "--frames",
            "/nonexistent/frames",
            "login",
            "--email",
            "a",
            "--password",
            "b",
        ]);
        let err = validate(&cli).unwrap_err();
        assert!(err.to_string().starts_with("Frames directory not found"));
    }

    #[test]
    fn test_validate_returns_frames_directory() {
        let dir = tempfile::tempdir().unwrap();
        let frames = dir.path().to_str().unwrap();
        let cli = parse(&[
            "register",
            "--username",
            "ada",
            "--email",
            "ada@example.com",
            "--password",
            "secret",
            "--frames",
            frames,
        ]);
        assert_eq!(validate(&cli).unwrap(), dir.path());
    }

    #[test]
    fn test_zero_attempts_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let frames = dir.path().to_str().unwrap();
        let cli = parse(&[
            "--frames",
            frames,
            "--attempts",
            "0",
            "login",
            "--email",
            "a",
            "--password",
            "b",
        ]);
        assert!(validate(&cli).is_err());
    }

    #[derive(Default)]
    struct RecordingNotifier {
        notices: Mutex<Vec<Notice>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, notice: Notice) {
            self.notices.lock().unwrap().push(notice);
        }
    }

    #[test]
    fn test_log_out_clears_sign_in_and_notifies() {
        let auth = AuthSession::new();
        auth.establish(Some("jwt".into()));
        let notifier = RecordingNotifier::default();

        log_out(&auth, &notifier);

        assert!(!auth.is_authenticated());
        let notices = notifier.notices.lock().unwrap();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].title, "Logged Out");
        assert_eq!(notices[0].severity, Severity::Info);
    }
}
