//! The playback engine: command handling plus the consumption worker.
//!
//! Commands arrive on the `TYPER` topic and mutate a small set of shared
//! flags; a dedicated worker task polls those flags between consumption
//! steps. `stop` is effective mid-token (checked per character, per chord,
//! per repeat cycle, per scroll tick). A literal text span is not atomic
//! either: the pause/focus gate runs again before every character, so
//! `pause` and focus loss take hold mid-span; the other token kinds pause
//! at their boundaries.

use std::sync::Arc;

use ghostwriter_protocol::{PlayStatus, Reply, StateMap, TyperCommand, topic};
use parking_lot::Mutex;
use serde_json::{Value, json};
use textdata::{Token, preview_line, tokenize};
use tokio::{
    sync::mpsc::UnboundedSender,
    time::{Duration, sleep},
};
use tracing::{debug, info, warn};

use crate::{
    seams::{InjectError, Injector, WindowOracle},
    settings::Settings,
};

/// Seconds between the `play` command and the first injected keystroke,
/// giving the operator time to focus the target window.
pub const START_DELAY_SECS: u64 = 5;

/// Seconds the worker waits after a resume before injecting again, so a
/// refocused window has settled.
pub const RESUME_SETTLE_SECS: u64 = 2;

/// How often the worker re-polls the shared flags while gated.
const POLL_INTERVAL_MS: u64 = 25;

/// Slice length for timed pauses, so `stop` interrupts them promptly.
const PAUSE_SLICE_MS: u64 = 100;

/// Channel the engine publishes `(topic, payload)` pairs on.
pub type Outbound = UnboundedSender<(String, Value)>;

type SharedInjector = Arc<Mutex<Box<dyn Injector>>>;
type SharedOracle = Arc<Mutex<Box<dyn WindowOracle>>>;

/// Flags and counters written by the command side and polled by the
/// worker between consumption steps.
#[derive(Debug)]
struct Shared {
    status: PlayStatus,
    position: usize,
    advance_newline: u32,
    advance_token: u32,
    resume_pending: bool,
    settings: Settings,
    target_window: Option<String>,
}

impl Shared {
    fn new() -> Self {
        Self {
            status: PlayStatus::Stopped,
            position: 0,
            advance_newline: 0,
            advance_token: 0,
            resume_pending: false,
            settings: Settings::default(),
            target_window: None,
        }
    }
}

/// What the gate granted for the next token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Grant {
    /// Normal playing consumption.
    Run,
    /// One advance-token credit was spent.
    TokenCredit,
    /// Consuming under an outstanding advance-newline credit; the credit
    /// is spent when an `enter` (or `atpause`) is consumed.
    NewlineCredit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Done,
    Aborted,
}

/// Which one-shot credit an advance command grants.
#[derive(Debug, Clone, Copy)]
enum AdvanceKind {
    Newline,
    Token,
}

/// The playback engine. One per typer process.
pub struct Engine {
    shared: Arc<Mutex<Shared>>,
    tokens: Option<Arc<Vec<Token>>>,
    injector: SharedInjector,
    oracle: SharedOracle,
    out: Outbound,
    app_title: String,
    worker: Option<tokio::task::JoinHandle<()>>,
}

impl Engine {
    /// Build an engine around the platform seams. `app_title` identifies
    /// the controlling UI's own window so playback refuses to type into it.
    pub fn new(
        injector: Box<dyn Injector>,
        oracle: Box<dyn WindowOracle>,
        out: Outbound,
        app_title: impl Into<String>,
    ) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared::new())),
            tokens: None,
            injector: Arc::new(Mutex::new(injector)),
            oracle: Arc::new(Mutex::new(oracle)),
            out,
            app_title: app_title.into(),
            worker: None,
        }
    }

    /// Replace the settings cache from a `STATE` full-map broadcast.
    pub fn apply_state(&self, map: &StateMap) {
        self.shared.lock().settings = Settings::from_map(map);
    }

    /// Current status, for tests and diagnostics.
    pub fn status(&self) -> PlayStatus {
        self.shared.lock().status
    }

    /// Index of the next token to consume.
    pub fn position(&self) -> usize {
        self.shared.lock().position
    }

    fn session_active(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Handle one `TYPER` command, publishing replies and status changes.
    pub fn handle_command(&mut self, cmd: TyperCommand) {
        match cmd {
            TyperCommand::LoadFile { file } => self.load_file(&file),
            TyperCommand::Data => self.data(),
            TyperCommand::Play => self.play(),
            TyperCommand::Stop => self.stop(),
            TyperCommand::Pause => self.pause(),
            TyperCommand::AdvanceNewline => self.advance(AdvanceKind::Newline),
            TyperCommand::AdvanceToken => self.advance(AdvanceKind::Token),
            TyperCommand::Help => self.reply(Reply::info(help())),
        }
    }

    fn load_file(&mut self, file: &str) {
        if self.session_active() {
            self.reply(Reply::err("stop playback before loading a new file"));
            return;
        }
        let text = match std::fs::read_to_string(file) {
            Ok(text) => text,
            Err(e) => {
                // Prior sequence stays loaded.
                warn!(file, error = %e, "load_file failed");
                self.reply(Reply::err(format!("cannot read '{}': {}", file, e)));
                return;
            }
        };
        let fold = self.shared.lock().settings.replace_quad_spaces_with_tab;
        let tokens = tokenize(&text, fold);
        let count = tokens.len();
        self.tokens = Some(Arc::new(tokens));
        self.shared.lock().position = 0;
        info!(file, count, "file loaded");
        self.reply(Reply::ok_with_message(format!(
            "loaded {} tokens from '{}'",
            count, file
        )));
    }

    fn data(&self) {
        let Some(tokens) = &self.tokens else {
            self.reply(Reply::err("no data loaded"));
            return;
        };
        let pos = self.shared.lock().position.min(tokens.len());
        let preview: Vec<String> = tokens[pos..].iter().map(preview_line).collect();
        self.reply(Reply::result(json!(preview)));
    }

    fn play(&mut self) {
        match self.shared.lock().status {
            PlayStatus::Playing => {
                self.reply(Reply::ok_with_warning("already playing"));
                return;
            }
            PlayStatus::Paused => {
                self.reply(Reply::ok_with_warning(
                    "session paused; use pause to resume",
                ));
                return;
            }
            PlayStatus::Stopped => {}
        }
        let Some(tokens) = self.tokens.clone() else {
            self.reply(Reply::err("no data loaded"));
            return;
        };
        // A stopped session's worker may still be draining; it holds no
        // locks across awaits, so aborting it here is safe.
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
        {
            let mut shared = self.shared.lock();
            shared.position = 0;
            shared.advance_newline = 0;
            shared.advance_token = 0;
            shared.resume_pending = false;
            shared.target_window = None;
            shared.status = PlayStatus::Playing;
        }
        self.publish_status(PlayStatus::Playing);
        self.worker = Some(tokio::spawn(session(
            self.shared.clone(),
            tokens,
            self.injector.clone(),
            self.oracle.clone(),
            self.out.clone(),
            self.app_title.clone(),
        )));
        self.reply(Reply::ok_with_message(format!(
            "playback starts in {} seconds",
            START_DELAY_SECS
        )));
    }

    fn stop(&mut self) {
        let was = {
            let mut shared = self.shared.lock();
            let was = shared.status;
            if was != PlayStatus::Stopped {
                shared.status = PlayStatus::Stopped;
            }
            was
        };
        if was == PlayStatus::Stopped {
            self.reply(Reply::ok_with_warning("not playing"));
            return;
        }
        self.publish_status(PlayStatus::Stopped);
        self.reply(Reply::ok_with_message("playback stopped"));
    }

    fn pause(&mut self) {
        let transition = {
            let mut shared = self.shared.lock();
            match shared.status {
                PlayStatus::Stopped => None,
                PlayStatus::Playing => {
                    shared.status = PlayStatus::Paused;
                    Some((PlayStatus::Paused, "playback paused"))
                }
                PlayStatus::Paused => {
                    shared.status = PlayStatus::Playing;
                    shared.resume_pending = true;
                    Some((PlayStatus::Playing, "playback resumed"))
                }
            }
        };
        match transition {
            Some((status, message)) => {
                self.publish_status(status);
                self.reply(Reply::ok_with_message(message));
            }
            None => self.reply(Reply::ok_with_warning("not playing")),
        }
    }

    fn advance(&self, kind: AdvanceKind) {
        let mut shared = self.shared.lock();
        if shared.status == PlayStatus::Stopped {
            drop(shared);
            self.reply(Reply::ok_with_warning("not playing"));
            return;
        }
        let name = match kind {
            AdvanceKind::Newline => {
                shared.advance_newline += 1;
                "newline"
            }
            AdvanceKind::Token => {
                shared.advance_token += 1;
                "token"
            }
        };
        drop(shared);
        self.reply(Reply::ok_with_message(format!("advance {} granted", name)));
    }

    fn reply(&self, reply: Reply) {
        send_reply(&self.out, reply);
    }

    fn publish_status(&self, status: PlayStatus) {
        send_status(&self.out, status);
    }
}

fn send_reply(out: &Outbound, reply: Reply) {
    let payload = serde_json::to_value(reply).unwrap_or_else(|_| json!({}));
    if out.send((topic::TYPER.to_string(), payload)).is_err() {
        warn!("outbound channel gone, reply dropped");
    }
}

/// Status changes go through the state store like any other write, so
/// every process sees them via the full-map broadcast.
fn send_status(out: &Outbound, status: PlayStatus) {
    let payload = json!({
        "cmd": "add",
        "key": "play_status",
        "value": status.as_str(),
        "type": "str",
    });
    if out.send((topic::STATE.to_string(), payload)).is_err() {
        warn!("outbound channel gone, status dropped");
    }
}

fn help() -> Value {
    json!({
        "commands": {
            "load_file": {"file": "path of a UTF-8 text file"},
            "data": {},
            "play": {},
            "stop": {},
            "pause": {},
            "advance_newline": {},
            "advance_token": {},
            "help": {},
        }
    })
}

/// One playback session, from startup delay to stop or exhaustion.
async fn session(
    shared: Arc<Mutex<Shared>>,
    tokens: Arc<Vec<Token>>,
    injector: SharedInjector,
    oracle: SharedOracle,
    out: Outbound,
    app_title: String,
) {
    sleep(Duration::from_secs(START_DELAY_SECS)).await;
    if shared.lock().status == PlayStatus::Stopped {
        finish(&shared, false);
        return;
    }

    // Whatever is focused when the delay expires is the typing target.
    let target = oracle.lock().focused_window();
    if let Some(title) = &target
        && !app_title.is_empty()
        && title.contains(&app_title)
    {
        warn!(%title, "focused window is the controlling UI, aborting");
        send_reply(
            &out,
            Reply::ok_with_warning("refusing to type into the controlling window"),
        );
        finish(&shared, true);
        send_status(&out, PlayStatus::Stopped);
        return;
    }
    debug!(target = ?target, "target window captured");
    {
        let mut s = shared.lock();
        s.target_window = target;
        if s.settings.start_playback_paused && s.status == PlayStatus::Playing {
            s.status = PlayStatus::Paused;
            drop(s);
            send_status(&out, PlayStatus::Paused);
        }
    }

    let total = tokens.len();
    loop {
        let pos = shared.lock().position;
        if pos >= total {
            info!("sequence exhausted");
            send_reply(&out, Reply::ok_with_message("playback complete"));
            finish(&shared, true);
            send_status(&out, PlayStatus::Stopped);
            return;
        }

        let Some(grant) = gate(&shared, &oracle, &out).await else {
            finish(&shared, true);
            return;
        };

        let token = &tokens[pos];
        if token.is_atpause() {
            shared.lock().position = pos + 1;
            let mut s = shared.lock();
            if grant == Grant::NewlineCredit {
                s.advance_newline = s.advance_newline.saturating_sub(1);
            }
            let was_playing = s.status == PlayStatus::Playing;
            if was_playing {
                s.status = PlayStatus::Paused;
            }
            drop(s);
            if was_playing {
                debug!("pause marker hit");
                send_status(&out, PlayStatus::Paused);
            }
            continue;
        }

        if consume(token, grant, &shared, &injector, &oracle, &out).await == Outcome::Aborted {
            finish(&shared, true);
            return;
        }
        shared.lock().position = pos + 1;

        if token.is_enter() {
            let mut s = shared.lock();
            match grant {
                Grant::NewlineCredit => {
                    s.advance_newline = s.advance_newline.saturating_sub(1);
                }
                Grant::Run => {
                    if s.settings.pause_on_new_line && s.status == PlayStatus::Playing {
                        s.status = PlayStatus::Paused;
                        drop(s);
                        send_status(&out, PlayStatus::Paused);
                    }
                }
                Grant::TokenCredit => {}
            }
        }
    }
}

/// Wait until consumption is permitted. Returns `None` when the session
/// was stopped.
async fn gate(shared: &Arc<Mutex<Shared>>, oracle: &SharedOracle, out: &Outbound) -> Option<Grant> {
    loop {
        let (status, resume, focus_check, refocus, target) = {
            let s = shared.lock();
            (
                s.status,
                s.resume_pending,
                s.settings.pause_on_window_not_focused,
                s.settings.refocus_window_on_resume,
                s.target_window.clone(),
            )
        };
        match status {
            PlayStatus::Stopped => return None,
            PlayStatus::Playing => {
                if resume {
                    if refocus && let Some(title) = &target {
                        oracle.lock().focus(title);
                    }
                    sleep(Duration::from_secs(RESUME_SETTLE_SECS)).await;
                    shared.lock().resume_pending = false;
                    continue;
                }
                if focus_check {
                    let focused = oracle.lock().focused_window();
                    let on_target =
                        matches!((&focused, &target), (Some(f), Some(t)) if f == t);
                    if !on_target {
                        debug!(focused = ?focused, "target window not focused, pausing");
                        shared.lock().status = PlayStatus::Paused;
                        send_status(out, PlayStatus::Paused);
                        send_reply(
                            out,
                            Reply::ok_with_warning("target window not focused; playback paused"),
                        );
                        continue;
                    }
                }
                return Some(Grant::Run);
            }
            PlayStatus::Paused => {
                // The guard must leave scope before the sleep; the worker
                // future has to stay `Send`.
                let granted = {
                    let mut s = shared.lock();
                    if s.advance_token > 0 {
                        s.advance_token -= 1;
                        Some(Grant::TokenCredit)
                    } else if s.advance_newline > 0 {
                        Some(Grant::NewlineCredit)
                    } else {
                        None
                    }
                };
                match granted {
                    Some(grant) => return Some(grant),
                    None => sleep(Duration::from_millis(POLL_INTERVAL_MS)).await,
                }
            }
        }
    }
}

/// End the session: reset progress and credits, optionally forcing the
/// status to stopped.
fn finish(shared: &Arc<Mutex<Shared>>, force_stop: bool) {
    let mut s = shared.lock();
    s.position = 0;
    s.advance_newline = 0;
    s.advance_token = 0;
    s.resume_pending = false;
    s.target_window = None;
    if force_stop {
        s.status = PlayStatus::Stopped;
    }
}

fn stopped(shared: &Arc<Mutex<Shared>>) -> bool {
    shared.lock().status == PlayStatus::Stopped
}

fn inject(result: Result<(), InjectError>) {
    if let Err(e) = result {
        warn!(error = %e, "injection error, continuing");
    }
}

/// Consume one token. Stop requests abort mid-token.
///
/// A literal span re-runs the gate before every character, so pause and
/// focus loss interrupt it mid-span. A credit granted at the session gate
/// (or mid-span while paused) covers the rest of the span; credits are
/// per token, not per character.
async fn consume(
    token: &Token,
    grant: Grant,
    shared: &Arc<Mutex<Shared>>,
    injector: &SharedInjector,
    oracle: &SharedOracle,
    out: &Outbound,
) -> Outcome {
    let (speed, control_on_newline, auto_home) = {
        let s = shared.lock();
        (
            Duration::from_millis(s.settings.speed_ms),
            s.settings.control_on_newline,
            s.settings.auto_home_on_newline,
        )
    };
    match token {
        Token::Text(text) => {
            let mut covered = grant != Grant::Run;
            for c in text.chars() {
                if covered {
                    if stopped(shared) {
                        return Outcome::Aborted;
                    }
                } else {
                    match gate(shared, oracle, out).await {
                        None => return Outcome::Aborted,
                        Some(Grant::Run) => {}
                        Some(_) => covered = true,
                    }
                }
                inject(injector.lock().inject_char(c));
                sleep(speed).await;
            }
        }
        Token::SingleKey(key) => {
            if stopped(shared) {
                return Outcome::Aborted;
            }
            if key == "enter" {
                if control_on_newline {
                    inject(injector.lock().chord(&["ctrl".into(), "enter".into()]));
                } else {
                    inject(injector.lock().press_key("enter"));
                }
                if auto_home {
                    sleep(speed).await;
                    inject(injector.lock().press_key("home"));
                }
            } else {
                inject(injector.lock().press_key(key));
            }
            sleep(speed).await;
        }
        Token::MultiKeys(keys) => {
            if stopped(shared) {
                return Outcome::Aborted;
            }
            inject(injector.lock().chord(keys));
            sleep(speed).await;
        }
        Token::TimedPause(secs) => {
            let mut remaining = Duration::from_secs_f64(*secs);
            let slice = Duration::from_millis(PAUSE_SLICE_MS);
            while remaining > Duration::ZERO {
                if stopped(shared) {
                    return Outcome::Aborted;
                }
                let step = remaining.min(slice);
                sleep(step).await;
                remaining -= step;
            }
        }
        Token::MouseScroll { count, direction } => {
            for _ in 0..*count {
                if stopped(shared) {
                    return Outcome::Aborted;
                }
                inject(injector.lock().scroll(*direction));
                sleep(speed).await;
            }
        }
        Token::RepeatedKey { key, count } => {
            for _ in 0..*count {
                if stopped(shared) {
                    return Outcome::Aborted;
                }
                inject(injector.lock().press_key(key));
                sleep(speed).await;
            }
        }
    }
    Outcome::Done
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use serde_json::json;
    use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

    use super::*;
    use crate::seams::NullOracle;

    type Log = Arc<Mutex<Vec<String>>>;

    struct RecInjector {
        log: Log,
    }

    impl Injector for RecInjector {
        fn inject_char(&mut self, c: char) -> Result<(), InjectError> {
            self.log.lock().push(format!("c:{c}"));
            Ok(())
        }

        fn press_key(&mut self, key: &str) -> Result<(), InjectError> {
            self.log.lock().push(format!("k:{key}"));
            Ok(())
        }

        fn chord(&mut self, keys: &[String]) -> Result<(), InjectError> {
            self.log.lock().push(format!("chord:{}", keys.join("+")));
            Ok(())
        }

        fn scroll(&mut self, direction: i8) -> Result<(), InjectError> {
            self.log.lock().push(format!("scroll:{direction}"));
            Ok(())
        }
    }

    struct FakeOracle {
        focused: Arc<Mutex<Option<String>>>,
    }

    impl WindowOracle for FakeOracle {
        fn focused_window(&mut self) -> Option<String> {
            self.focused.lock().clone()
        }

        fn focus(&mut self, _title: &str) -> bool {
            true
        }
    }

    struct Rig {
        engine: Engine,
        out: UnboundedReceiver<(String, Value)>,
        log: Log,
        focused: Arc<Mutex<Option<String>>>,
        _file: tempfile::NamedTempFile,
    }

    fn rig(text: &str) -> Rig {
        let log: Log = Arc::default();
        let focused = Arc::new(Mutex::new(Some("Target Editor".to_string())));
        let (tx, out) = unbounded_channel();
        let mut engine = Engine::new(
            Box::new(RecInjector { log: log.clone() }),
            Box::new(FakeOracle {
                focused: focused.clone(),
            }),
            tx,
            "ghostwriter",
        );
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        engine.handle_command(TyperCommand::LoadFile {
            file: file.path().to_string_lossy().into_owned(),
        });
        Rig {
            engine,
            out,
            log,
            focused,
            _file: file,
        }
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..20_000 {
            if cond() {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    /// Drain the outbound channel into a list of (topic, payload) pairs.
    fn drain(out: &mut UnboundedReceiver<(String, Value)>) -> Vec<(String, Value)> {
        let mut collected = Vec::new();
        while let Ok(pair) = out.try_recv() {
            collected.push(pair);
        }
        collected
    }

    fn status_updates(frames: &[(String, Value)]) -> Vec<String> {
        frames
            .iter()
            .filter(|(t, p)| t == topic::STATE && p["key"] == "play_status")
            .map(|(_, p)| p["value"].as_str().unwrap_or("").to_string())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn play_runs_to_exhaustion() {
        let mut r = rig("hi");
        r.engine.handle_command(TyperCommand::Play);
        wait_until(|| r.engine.status() == PlayStatus::Stopped && r.log.lock().len() == 2).await;

        assert_eq!(*r.log.lock(), vec!["c:h", "c:i"]);
        assert_eq!(r.engine.position(), 0, "progress reset after exhaustion");
        let frames = drain(&mut r.out);
        assert_eq!(status_updates(&frames), vec!["playing", "stopped"]);
    }

    #[tokio::test(start_paused = true)]
    async fn play_without_data_is_an_error() {
        let log: Log = Arc::default();
        let (tx, mut out) = unbounded_channel();
        let mut engine = Engine::new(
            Box::new(RecInjector { log }),
            Box::new(NullOracle),
            tx,
            "ghostwriter",
        );
        engine.handle_command(TyperCommand::Play);
        let frames = drain(&mut out);
        assert_eq!(frames[0].0, topic::TYPER);
        assert!(frames[0].1["error"].is_string());
    }

    #[tokio::test(start_paused = true)]
    async fn load_failure_keeps_prior_sequence() {
        let mut r = rig("keep me");
        r.engine.handle_command(TyperCommand::LoadFile {
            file: "/definitely/not/a/file".into(),
        });
        let frames = drain(&mut r.out);
        assert!(frames.last().unwrap().1["error"].is_string());

        r.engine.handle_command(TyperCommand::Data);
        let frames = drain(&mut r.out);
        let preview = frames.last().unwrap().1["result"].clone();
        assert_eq!(preview, json!(["[ keep ]", "[   ]", "[ me ]"]));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_double_toggle_resumes() {
        let mut r = rig("ab\ncd\nef\ngh");
        r.engine.handle_command(TyperCommand::Play);
        wait_until(|| !r.log.lock().is_empty()).await;

        r.engine.handle_command(TyperCommand::Pause);
        assert_eq!(r.engine.status(), PlayStatus::Paused);
        // Let the worker finish its in-flight token and settle at the
        // gate, then confirm nothing moves.
        let frozen = {
            sleep(Duration::from_secs(2)).await;
            r.log.lock().len()
        };
        sleep(Duration::from_secs(2)).await;
        assert_eq!(r.log.lock().len(), frozen);

        r.engine.handle_command(TyperCommand::Pause);
        assert_eq!(r.engine.status(), PlayStatus::Playing);
        wait_until(|| r.engine.status() == PlayStatus::Stopped).await;
        assert_eq!(
            r.log.lock().len(),
            11,
            "8 characters and 3 newlines, each exactly once"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pause_interrupts_a_literal_span() {
        // One 60-character word is a single text token; pause must still
        // take hold between characters, not at the token boundary.
        let word = "x".repeat(60);
        let mut r = rig(&word);
        r.engine.handle_command(TyperCommand::Play);
        wait_until(|| r.log.lock().len() >= 3).await;

        r.engine.handle_command(TyperCommand::Pause);
        sleep(Duration::from_secs(2)).await;
        let frozen = r.log.lock().len();
        assert!(frozen < 60, "typed {} of 60 before pausing", frozen);
        sleep(Duration::from_secs(2)).await;
        assert_eq!(r.log.lock().len(), frozen, "no typing while paused");

        r.engine.handle_command(TyperCommand::Pause);
        wait_until(|| r.engine.status() == PlayStatus::Stopped).await;
        assert_eq!(r.log.lock().len(), 60, "resume finishes the span");
    }

    #[tokio::test(start_paused = true)]
    async fn focus_loss_pauses_inside_a_literal_span() {
        let word = "y".repeat(60);
        let mut r = rig(&word);
        let map: ghostwriter_protocol::StateMap =
            serde_json::from_value(json!({"pause_on_window_not_focused": true})).unwrap();
        r.engine.apply_state(&map);

        r.engine.handle_command(TyperCommand::Play);
        wait_until(|| r.log.lock().len() >= 3).await;

        *r.focused.lock() = Some("Something Else".to_string());
        wait_until(|| r.engine.status() == PlayStatus::Paused).await;
        let frozen = r.log.lock().len();
        assert!(frozen < 60, "typed {} of 60 before the focus pause", frozen);
        sleep(Duration::from_secs(2)).await;
        assert_eq!(r.log.lock().len(), frozen, "no typing while unfocused");
    }

    #[tokio::test(start_paused = true)]
    async fn stop_then_play_restarts_from_token_zero() {
        let mut r = rig("abcdefghijklmnopqrstuvwxyz");
        r.engine.handle_command(TyperCommand::Play);
        wait_until(|| r.log.lock().len() >= 3).await;

        r.engine.handle_command(TyperCommand::Stop);
        assert_eq!(r.engine.status(), PlayStatus::Stopped);
        wait_until(|| r.engine.position() == 0).await;

        r.log.lock().clear();
        r.engine.handle_command(TyperCommand::Play);
        wait_until(|| r.engine.status() == PlayStatus::Stopped && !r.log.lock().is_empty()).await;
        assert_eq!(r.log.lock().len(), 26, "second run starts from the top");
        assert_eq!(r.log.lock()[0], "c:a");
    }

    #[tokio::test(start_paused = true)]
    async fn advance_token_consumes_exactly_one_token() {
        let mut r = rig("one two");
        let paused_start: ghostwriter_protocol::StateMap =
            serde_json::from_value(json!({"start_playback_paused": true})).unwrap();
        r.engine.apply_state(&paused_start);

        r.engine.handle_command(TyperCommand::Play);
        wait_until(|| r.engine.status() == PlayStatus::Paused).await;
        assert!(r.log.lock().is_empty(), "nothing typed while paused");

        // "one two" tokenizes as [Text("one"), SingleKey(space), Text("two")].
        r.engine.handle_command(TyperCommand::AdvanceToken);
        wait_until(|| r.engine.position() == 1).await;
        sleep(Duration::from_secs(2)).await;
        assert_eq!(r.engine.position(), 1, "exactly one token consumed");
        assert_eq!(r.engine.status(), PlayStatus::Paused);
        assert_eq!(*r.log.lock(), vec!["c:o", "c:n", "c:e"]);
    }

    #[tokio::test(start_paused = true)]
    async fn advance_newline_runs_until_enter_consumed() {
        let mut r = rig("ab\ncd");
        let paused_start: ghostwriter_protocol::StateMap =
            serde_json::from_value(json!({"start_playback_paused": true})).unwrap();
        r.engine.apply_state(&paused_start);

        r.engine.handle_command(TyperCommand::Play);
        wait_until(|| r.engine.status() == PlayStatus::Paused).await;

        // [Text("ab"), enter, Text("cd")]: one newline credit covers the
        // text and the enter, then consumption gates again.
        r.engine.handle_command(TyperCommand::AdvanceNewline);
        wait_until(|| r.engine.position() == 2).await;
        sleep(Duration::from_secs(2)).await;
        assert_eq!(r.engine.position(), 2);
        assert_eq!(r.engine.status(), PlayStatus::Paused);
        assert_eq!(*r.log.lock(), vec!["c:a", "c:b", "k:enter"]);
    }

    #[tokio::test(start_paused = true)]
    async fn atpause_spends_newline_credit() {
        let mut r = rig("x<<pause>>y");
        let paused_start: ghostwriter_protocol::StateMap =
            serde_json::from_value(json!({"start_playback_paused": true})).unwrap();
        r.engine.apply_state(&paused_start);

        r.engine.handle_command(TyperCommand::Play);
        wait_until(|| r.engine.status() == PlayStatus::Paused).await;

        // [Text("x"), atpause, Text("y")]: the credit carries consumption
        // through the text, is spent by the pause marker, and "y" stays.
        r.engine.handle_command(TyperCommand::AdvanceNewline);
        wait_until(|| r.engine.position() == 2).await;
        sleep(Duration::from_secs(2)).await;
        assert_eq!(r.engine.position(), 2);
        assert_eq!(r.engine.status(), PlayStatus::Paused);
        assert_eq!(*r.log.lock(), vec!["c:x"]);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_on_new_line_pauses_after_enter() {
        let mut r = rig("a\nb");
        let map: ghostwriter_protocol::StateMap =
            serde_json::from_value(json!({"pause_on_new_line": true})).unwrap();
        r.engine.apply_state(&map);

        r.engine.handle_command(TyperCommand::Play);
        wait_until(|| r.engine.status() == PlayStatus::Paused).await;
        assert_eq!(*r.log.lock(), vec!["c:a", "k:enter"]);
        assert_eq!(r.engine.position(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn focus_loss_pauses_implicitly() {
        let mut r = rig("aa\nbb\ncc\ndd");
        let map: ghostwriter_protocol::StateMap =
            serde_json::from_value(json!({"pause_on_window_not_focused": true})).unwrap();
        r.engine.apply_state(&map);

        r.engine.handle_command(TyperCommand::Play);
        wait_until(|| r.log.lock().len() >= 2).await;

        *r.focused.lock() = Some("Something Else".to_string());
        wait_until(|| r.engine.status() == PlayStatus::Paused).await;
        let frozen = r.log.lock().len();
        sleep(Duration::from_secs(2)).await;
        assert_eq!(r.log.lock().len(), frozen, "no typing while unfocused");

        // Focus returns; resuming picks up where it left off.
        *r.focused.lock() = Some("Target Editor".to_string());
        r.engine.handle_command(TyperCommand::Pause);
        wait_until(|| r.engine.status() == PlayStatus::Stopped).await;
        assert_eq!(
            r.log.lock().iter().filter(|s| *s == "k:enter").count(),
            3,
            "every newline typed exactly once"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn refuses_to_type_into_own_window() {
        let mut r = rig("hello");
        *r.focused.lock() = Some("ghostwriter control".to_string());

        r.engine.handle_command(TyperCommand::Play);
        sleep(Duration::from_secs(START_DELAY_SECS + 2)).await;
        assert_eq!(r.engine.status(), PlayStatus::Stopped);
        assert!(r.log.lock().is_empty());
        let frames = drain(&mut r.out);
        assert!(
            frames
                .iter()
                .any(|(t, p)| t == topic::TYPER && p["warning"].is_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn control_and_home_wrap_newlines() {
        let mut r = rig("a\nb");
        let map: ghostwriter_protocol::StateMap = serde_json::from_value(json!({
            "control_on_newline": true,
            "auto_home_on_newline": true,
        }))
        .unwrap();
        r.engine.apply_state(&map);

        r.engine.handle_command(TyperCommand::Play);
        wait_until(|| r.engine.status() == PlayStatus::Stopped && !r.log.lock().is_empty()).await;
        assert_eq!(
            *r.log.lock(),
            vec!["c:a", "chord:ctrl+enter", "k:home", "c:b"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn advance_while_stopped_is_a_warning() {
        let mut r = rig("x");
        r.engine.handle_command(TyperCommand::AdvanceToken);
        let frames = drain(&mut r.out);
        assert!(frames.last().unwrap().1["warning"].is_string());
    }

    #[tokio::test(start_paused = true)]
    async fn data_previews_remaining_tokens() {
        let mut r = rig("hello world");
        drain(&mut r.out);
        r.engine.handle_command(TyperCommand::Data);
        let frames = drain(&mut r.out);
        assert_eq!(
            frames[0].1["result"],
            json!(["[ hello ]", "[   ]", "[ world ]"])
        );
    }
}
