//! Rock-paper-scissors game logic.
//!
//! A round is a small state machine driven by explicit timestamps (offsets
//! from an arbitrary start), so it can be replayed in tests without sleeping:
//!
//! ```text
//! Countdown (3 s) -> Capture (3 s, keep best-confidence gesture) -> Finished
//! ```
//!
//! The computer move is drawn when the round starts.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Result};
use rand::Rng;

use crate::annotate::Annotator;
use crate::frame::Frame;
use crate::pipeline::{FrameReport, FrameSink, QualifiedDetection, SinkControl};

pub const COUNTDOWN: Duration = Duration::from_secs(3);
pub const CAPTURE_WINDOW: Duration = Duration::from_secs(3);

/// Accepted range for the nominal frame rate that drives game time.
pub const MIN_FPS: f64 = 0.1;
pub const MAX_FPS: f64 = 1000.0;

const HIGHLIGHT: [u8; 3] = [255, 255, 0];
const RESULT_COLOR: [u8; 3] = [0, 255, 0];
const TEXT_COLOR: [u8; 3] = [255, 255, 255];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Gesture {
    Rock,
    Paper,
    Scissors,
}

impl Gesture {
    pub const ALL: [Gesture; 3] = [Gesture::Rock, Gesture::Paper, Gesture::Scissors];

    pub fn as_str(&self) -> &'static str {
        match self {
            Gesture::Rock => "rock",
            Gesture::Paper => "paper",
            Gesture::Scissors => "scissors",
        }
    }

    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::ALL[rng.gen_range(0..Self::ALL.len())]
    }

    fn beats(self, other: Gesture) -> bool {
        matches!(
            (self, other),
            (Gesture::Rock, Gesture::Scissors)
                | (Gesture::Paper, Gesture::Rock)
                | (Gesture::Scissors, Gesture::Paper)
        )
    }
}

impl fmt::Display for Gesture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Gesture {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rock" => Ok(Gesture::Rock),
            "paper" => Ok(Gesture::Paper),
            "scissors" => Ok(Gesture::Scissors),
            other => Err(anyhow!("'{}' is not a gesture", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Tie,
    PlayerWins,
    ComputerWins,
}

impl Outcome {
    pub fn message(&self) -> &'static str {
        match self {
            Outcome::Tie => "Tie!",
            Outcome::PlayerWins => "You win!",
            Outcome::ComputerWins => "Computer wins!",
        }
    }
}

pub fn judge(player: Gesture, computer: Gesture) -> Outcome {
    if player == computer {
        Outcome::Tie
    } else if player.beats(computer) {
        Outcome::PlayerWins
    } else {
        Outcome::ComputerWins
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoundPhase {
    /// Whole seconds left on the countdown (3, 2, 1).
    Countdown(u64),
    Capture,
    Finished,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RoundResult {
    pub computer: Gesture,
    pub player: Option<Gesture>,
    pub confidence: f32,
}

impl RoundResult {
    pub fn outcome(&self) -> Option<Outcome> {
        self.player.map(|player| judge(player, self.computer))
    }

    pub fn message(&self) -> String {
        match (self.player, self.outcome()) {
            (Some(player), Some(outcome)) => {
                format!("You played {}. {}", player, outcome.message())
            }
            _ => "No move detected! Try again.".to_string(),
        }
    }
}

/// One round of play.
#[derive(Clone, Debug)]
pub struct Round {
    started_at: Duration,
    computer: Gesture,
    best: Option<(Gesture, f32)>,
}

impl Round {
    pub fn start(now: Duration, computer: Gesture) -> Self {
        Self {
            started_at: now,
            computer,
            best: None,
        }
    }

    pub fn computer(&self) -> Gesture {
        self.computer
    }

    pub fn phase(&self, now: Duration) -> RoundPhase {
        let elapsed = now.saturating_sub(self.started_at);
        if elapsed < COUNTDOWN {
            let left = COUNTDOWN - elapsed;
            // Round up so the display reads 3, 2, 1.
            let secs = left.as_secs() + u64::from(left.subsec_nanos() > 0);
            RoundPhase::Countdown(secs)
        } else if elapsed < COUNTDOWN + CAPTURE_WINDOW {
            RoundPhase::Capture
        } else {
            RoundPhase::Finished
        }
    }

    /// Feed one frame's gestures. Only counted during the capture window.
    pub fn observe(&mut self, now: Duration, detections: &[QualifiedDetection]) -> RoundPhase {
        let phase = self.phase(now);
        if phase == RoundPhase::Capture {
            if let Some((gesture, confidence)) = strongest_gesture(detections) {
                let better = self.best.map_or(true, |(_, best)| confidence > best);
                if better {
                    self.best = Some((gesture, confidence));
                }
            }
        }
        phase
    }

    pub fn result(&self) -> RoundResult {
        RoundResult {
            computer: self.computer,
            player: self.best.map(|(gesture, _)| gesture),
            confidence: self.best.map(|(_, c)| c).unwrap_or(0.0),
        }
    }
}

/// Highest-confidence detection whose category names a gesture.
pub fn strongest_gesture(detections: &[QualifiedDetection]) -> Option<(Gesture, f32)> {
    detections
        .iter()
        .filter_map(|d| {
            d.category
                .parse::<Gesture>()
                .ok()
                .map(|g| (g, d.confidence))
        })
        .max_by(|a, b| a.1.total_cmp(&b.1))
}

/// Game session: at most one active round plus the last finished result.
pub struct Game<R: Rng> {
    rng: R,
    round: Option<Round>,
    last_result: Option<RoundResult>,
    current: Option<(Gesture, f32)>,
    rounds_played: u32,
}

impl<R: Rng> Game<R> {
    pub fn new(rng: R) -> Self {
        Self {
            rng,
            round: None,
            last_result: None,
            current: None,
            rounds_played: 0,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.round.is_some()
    }

    pub fn rounds_played(&self) -> u32 {
        self.rounds_played
    }

    pub fn last_result(&self) -> Option<&RoundResult> {
        self.last_result.as_ref()
    }

    /// Start a new round, replacing any round in progress.
    pub fn start_round(&mut self, now: Duration) -> Gesture {
        let computer = Gesture::random(&mut self.rng);
        self.round = Some(Round::start(now, computer));
        self.last_result = None;
        computer
    }

    /// Feed one processed frame. Returns the result when a round finishes.
    pub fn update(
        &mut self,
        now: Duration,
        detections: &[QualifiedDetection],
    ) -> Option<RoundResult> {
        self.current = strongest_gesture(detections);
        let round = self.round.as_mut()?;
        if round.observe(now, detections) != RoundPhase::Finished {
            return None;
        }
        let result = round.result();
        self.round = None;
        self.rounds_played += 1;
        self.last_result = Some(result.clone());
        Some(result)
    }

    pub fn phase(&self, now: Duration) -> Option<RoundPhase> {
        self.round.as_ref().map(|round| round.phase(now))
    }

    /// Gesture seen on the most recent frame.
    pub fn current(&self) -> Option<(Gesture, f32)> {
        self.current
    }
}

/// Draws game state with `Annotator::draw_banner`.
pub struct GameOverlay {
    instructions: String,
}

impl GameOverlay {
    pub fn new(instructions: impl Into<String>) -> Self {
        Self {
            instructions: instructions.into(),
        }
    }

    pub fn render<R: Rng>(
        &self,
        annotator: &Annotator,
        frame: &mut Frame,
        game: &Game<R>,
        now: Duration,
    ) {
        let width = frame.width() as i32;
        let height = frame.height() as i32;
        match game.phase(now) {
            Some(RoundPhase::Countdown(secs)) => {
                annotator.draw_banner(frame, &secs.to_string(), (width / 2 - 20, 30), HIGHLIGHT);
            }
            Some(RoundPhase::Capture) => {
                annotator.draw_banner(frame, "Show your move!", (width / 2 - 100, 30), HIGHLIGHT);
            }
            Some(RoundPhase::Finished) | None => {
                if let Some(result) = game.last_result() {
                    let computer = format!("Computer played: {}", result.computer);
                    annotator.draw_banner(frame, &computer, (10, 10), TEXT_COLOR);
                    annotator.draw_banner(frame, &result.message(), (10, 50), RESULT_COLOR);
                }
            }
        }
        if let Some((gesture, _)) = game.current() {
            let detected = format!("Detected: {}", gesture);
            annotator.draw_banner(frame, &detected, (10, height - 70), TEXT_COLOR);
        }
        annotator.draw_banner(frame, &self.instructions, (10, height - 30), TEXT_COLOR);
    }
}

/// Plays a fixed number of rounds on the pipeline's output, then stops it.
///
/// Game time is derived from the frame index at a nominal frame rate, so
/// file and synthetic sources play the same way regardless of how fast
/// inference runs.
pub struct GameSink<R: Rng> {
    game: Game<R>,
    overlay: GameOverlay,
    annotator: Annotator,
    fps: f64,
    rounds: u32,
    results: Vec<RoundResult>,
    last_frame: Option<Frame>,
}

impl<R: Rng> GameSink<R> {
    pub fn new(game: Game<R>, annotator: Annotator, fps: f64, rounds: u32) -> Result<Self> {
        if !(MIN_FPS..=MAX_FPS).contains(&fps) {
            return Err(anyhow!(
                "frame rate must be within {}..={}, got {}",
                MIN_FPS,
                MAX_FPS,
                fps
            ));
        }
        Ok(Self {
            game,
            overlay: GameOverlay::new("Hold your gesture up to the camera"),
            annotator,
            fps,
            rounds,
            results: Vec::new(),
            last_frame: None,
        })
    }

    pub fn results(&self) -> &[RoundResult] {
        &self.results
    }

    /// Most recent frame with the game overlay drawn on it.
    pub fn last_frame(&self) -> Option<&Frame> {
        self.last_frame.as_ref()
    }

    fn game_time(&self, frame_index: u64) -> Duration {
        Duration::try_from_secs_f64(frame_index as f64 / self.fps).unwrap_or(Duration::MAX)
    }

    fn done(&self) -> bool {
        !self.game.is_playing() && self.game.rounds_played() >= self.rounds
    }
}

impl<R: Rng> FrameSink for GameSink<R> {
    fn present(&mut self, report: &FrameReport) -> Result<SinkControl> {
        let now = self.game_time(report.frame_index);
        if !self.game.is_playing() && self.game.rounds_played() < self.rounds {
            self.game.start_round(now);
            log::info!("round {} of {}: get ready", self.game.rounds_played() + 1, self.rounds);
        }
        if let Some(result) = self.game.update(now, &report.detections) {
            log::info!(
                "round {}: computer played {}. {}",
                self.game.rounds_played(),
                result.computer,
                result.message()
            );
            self.results.push(result);
        }

        let mut frame = report.annotated.clone();
        self.overlay.render(&self.annotator, &mut frame, &self.game, now);
        self.last_frame = Some(frame);

        if self.done() {
            Ok(SinkControl::Stop)
        } else {
            Ok(SinkControl::Continue)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn seen(category: &str, confidence: f32) -> QualifiedDetection {
        QualifiedDetection {
            category: category.to_string(),
            class_label: category.to_string(),
            confidence,
            bbox: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
            image_path: None,
        }
    }

    fn secs(s: f32) -> Duration {
        Duration::from_secs_f32(s)
    }

    #[test]
    fn judge_follows_the_rules_table() {
        use Gesture::*;
        let table = [
            (Rock, Rock, "Tie!"),
            (Rock, Paper, "Computer wins!"),
            (Rock, Scissors, "You win!"),
            (Paper, Rock, "You win!"),
            (Paper, Paper, "Tie!"),
            (Paper, Scissors, "Computer wins!"),
            (Scissors, Rock, "Computer wins!"),
            (Scissors, Paper, "You win!"),
            (Scissors, Scissors, "Tie!"),
        ];
        for (player, computer, message) in table {
            assert_eq!(judge(player, computer).message(), message);
        }
    }

    #[test]
    fn gesture_parses_model_labels() {
        assert_eq!("Rock".parse::<Gesture>().unwrap(), Gesture::Rock);
        assert_eq!(" scissors ".parse::<Gesture>().unwrap(), Gesture::Scissors);
        assert!("hand".parse::<Gesture>().is_err());
    }

    #[test]
    fn round_phases_follow_the_clock() {
        let round = Round::start(secs(10.0), Gesture::Rock);
        assert_eq!(round.phase(secs(10.0)), RoundPhase::Countdown(3));
        assert_eq!(round.phase(secs(11.5)), RoundPhase::Countdown(2));
        assert_eq!(round.phase(secs(12.9)), RoundPhase::Countdown(1));
        assert_eq!(round.phase(secs(13.0)), RoundPhase::Capture);
        assert_eq!(round.phase(secs(15.9)), RoundPhase::Capture);
        assert_eq!(round.phase(secs(16.0)), RoundPhase::Finished);
    }

    #[test]
    fn round_keeps_best_gesture_seen_during_capture() {
        let mut round = Round::start(Duration::ZERO, Gesture::Rock);
        // Ignored: still counting down.
        round.observe(secs(1.0), &[seen("scissors", 0.99)]);
        round.observe(secs(3.5), &[seen("paper", 0.4)]);
        round.observe(secs(4.0), &[seen("rock", 0.3), seen("scissors", 0.2)]);
        round.observe(secs(5.0), &[seen("paper", 0.6)]);
        // Ignored: window closed.
        round.observe(secs(6.5), &[seen("scissors", 0.95)]);

        let result = round.result();
        assert_eq!(result.player, Some(Gesture::Paper));
        assert_eq!(result.outcome(), Some(Outcome::PlayerWins));
        assert_eq!(result.message(), "You played paper. You win!");
    }

    #[test]
    fn round_without_gesture_asks_to_retry() {
        let round = Round::start(Duration::ZERO, Gesture::Paper);
        let result = round.result();
        assert_eq!(result.outcome(), None);
        assert_eq!(result.message(), "No move detected! Try again.");
    }

    #[test]
    fn game_reports_result_once_round_finishes() {
        let mut game = Game::new(StdRng::seed_from_u64(7));
        let computer = game.start_round(Duration::ZERO);
        assert!(game.is_playing());
        assert_eq!(game.update(secs(3.5), &[seen("rock", 0.8)]), None);
        let result = game.update(secs(6.1), &[]).unwrap();
        assert_eq!(result.computer, computer);
        assert_eq!(result.player, Some(Gesture::Rock));
        assert!(!game.is_playing());
        assert_eq!(game.rounds_played(), 1);
        assert_eq!(game.last_result(), Some(&result));
    }

    #[test]
    fn random_moves_cover_every_gesture() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            seen.insert(Gesture::random(&mut rng));
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn render_draws_countdown_banner() {
        let mut game = Game::new(StdRng::seed_from_u64(1));
        game.start_round(Duration::ZERO);
        let mut frame = Frame::filled(320, 240, [90, 90, 90], 1);
        let overlay = GameOverlay::new("");
        overlay.render(&Annotator::default(), &mut frame, &game, secs(0.5));
        assert_eq!(frame.image().get_pixel(140, 30).0, [0, 0, 0]);
        assert_eq!(frame.image().get_pixel(5, 200).0, [90, 90, 90]);
    }

    fn report(index: u64, detections: Vec<QualifiedDetection>) -> FrameReport {
        FrameReport {
            frame_index: index,
            annotated: Frame::filled(64, 48, [0, 0, 0], index),
            detections,
            failures: Vec::new(),
        }
    }

    #[test]
    fn game_sink_plays_requested_rounds_then_stops() {
        let game = Game::new(StdRng::seed_from_u64(3));
        let mut sink = GameSink::new(game, Annotator::default(), 1.0, 2).unwrap();

        // Round 1 starts at t=1, captures during [4, 7), finishes at t=7.
        let mut index = 1;
        loop {
            let detections = if (4..7).contains(&index) {
                vec![seen("scissors", 0.7)]
            } else {
                Vec::new()
            };
            let control = sink.present(&report(index, detections)).unwrap();
            if control == SinkControl::Stop {
                break;
            }
            index += 1;
            assert!(index < 100, "game never finished");
        }

        // Round 2 starts on frame 8 and finishes on frame 14 with no gesture.
        assert_eq!(index, 14);
        let results = sink.results();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].player, Some(Gesture::Scissors));
        assert_eq!(results[1].player, None);
        assert!(sink.last_frame().is_some());
    }

    #[test]
    fn game_sink_rejects_out_of_range_frame_rate() {
        for fps in [0.0, -15.0, 1.0e-300, f64::NAN, f64::INFINITY, MAX_FPS * 2.0] {
            let game = Game::new(StdRng::seed_from_u64(3));
            let err = GameSink::new(game, Annotator::default(), fps, 1)
                .err()
                .unwrap();
            assert!(err.to_string().contains("frame rate"), "{fps}");
        }
        let game = Game::new(StdRng::seed_from_u64(3));
        assert!(GameSink::new(game, Annotator::default(), MIN_FPS, 1).is_ok());
    }

    #[test]
    fn game_time_saturates_for_huge_frame_indices() {
        let game = Game::new(StdRng::seed_from_u64(3));
        let mut sink = GameSink::new(game, Annotator::default(), MIN_FPS, 1).unwrap();
        assert_eq!(sink.game_time(u64::MAX), Duration::MAX);
        assert!(sink.game_time(10) < Duration::MAX);
        sink.present(&report(u64::MAX, Vec::new())).unwrap();
        assert!(sink.game.is_playing());
    }
}
