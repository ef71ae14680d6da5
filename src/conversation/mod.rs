//! Conversation State Machine (spec §4.4).
//!
//! Pure transition logic over caller audio, model events, and wall-clock
//! ticks — no socket or task code lives here, so every transition is
//! directly unit-testable. The [`StateMachine`] owns nothing but its own
//! state, timers, and the running count of sub-threshold frames needed to
//! call a turn over; the orchestrator drives it and carries out whatever
//! [`Action`]s come back.

use crate::types::{CallerFrame, ModelFrame};
use std::time::{Duration, Instant};

/// Normalized RMS below this is silence (spec §4.4).
pub const SILENCE_THRESHOLD: f32 = 0.008;
/// Normalized RMS above this is unambiguously loud speech, bypassing the
/// interruption-sensitivity gate entirely.
pub const LOUD_THRESHOLD: f32 = 0.05;
/// Sub-[`SILENCE_THRESHOLD`] time required to call a human turn over.
pub const END_OF_TURN_SILENCE: Duration = Duration::from_millis(800);
/// Model silence after which the filler engine should be asked for a clip.
pub const FILLER_DELAY: Duration = Duration::from_millis(400);
/// Default ceiling on a single call's wall-clock duration.
pub const DEFAULT_MAX_CALL_DURATION: Duration = Duration::from_secs(600);
/// Default silence-timeout: no caller speech at all since the last turn.
pub const DEFAULT_SILENCE_TIMEOUT: Duration = Duration::from_secs(30);
/// No model audio at all while PROCESSING/RESPONDING.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(15);
/// Ignore caller frames for this long right after agent audio stops, so the
/// carrier's own echo of the just-played audio can't be mistaken for a
/// fresh human turn (SPEC_FULL.md §B echo guard).
pub const ECHO_GUARD: Duration = Duration::from_millis(600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Init,
    Welcome,
    Listening,
    HumanSpeaking,
    Processing,
    Responding,
    ResponseComplete,
    Ending,
    CallEnded,
}

/// Why the call ended — carried through to the transcript record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    CarrierHangup,
    MaxDuration,
    SilenceTimeout,
    ResponseTimeout,
    FatalUpstream,
}

/// What the orchestrator should do in response to a state transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    PlayWelcome,
    ForwardAudioToModel(Vec<i16>),
    PlayModelAudio(Vec<i16>),
    RequestFillerClip,
    SendBargeIn,
    PlayRecoveryMessage,
    EndCall(EndReason),
}

pub struct StateMachine {
    state: State,
    interruption_sensitivity: f32,
    max_call_duration: Duration,
    silence_timeout: Duration,
    call_started_at: Instant,
    last_human_activity_at: Instant,
    last_model_audio_at: Option<Instant>,
    sub_silence_since: Option<Instant>,
    echo_guard_until: Option<Instant>,
    filler_requested_this_turn: bool,
    /// Consecutive response timeouts (spec §7 `ResponseTimeout`): the first
    /// sends the call back to LISTENING with a recovery message, only a
    /// second one in a row ends the call. Reset whenever the model responds.
    consecutive_response_timeouts: u32,
}

impl StateMachine {
    pub fn new(interruption_sensitivity: f32, max_call_duration: Duration, silence_timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            state: State::Init,
            interruption_sensitivity: interruption_sensitivity.clamp(0.0, 1.0),
            max_call_duration,
            silence_timeout,
            call_started_at: now,
            last_human_activity_at: now,
            last_model_audio_at: None,
            sub_silence_since: None,
            echo_guard_until: None,
            filler_requested_this_turn: false,
            consecutive_response_timeouts: 0,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// INIT -> WELCOME -> LISTENING, driven once at call start.
    pub fn start(&mut self) -> Vec<Action> {
        self.state = State::Welcome;
        vec![Action::PlayWelcome]
    }

    /// The welcome clip finished playing.
    pub fn welcome_played(&mut self) {
        if self.state == State::Welcome {
            self.state = State::Listening;
            self.last_human_activity_at = Instant::now();
        }
    }

    /// A 20ms caller frame arrived. Drives LISTENING <-> HUMAN_SPEAKING and
    /// the barge-in gate while RESPONDING.
    pub fn on_caller_frame(&mut self, frame: &CallerFrame) -> Vec<Action> {
        let now = Instant::now();
        if self.in_echo_guard(now) {
            return vec![];
        }

        let is_loud_enough = frame.rms >= SILENCE_THRESHOLD;

        match self.state {
            State::Listening => {
                if is_loud_enough {
                    self.state = State::HumanSpeaking;
                    self.sub_silence_since = None;
                    self.last_human_activity_at = now;
                }
                vec![Action::ForwardAudioToModel(frame.pcm16_16k.clone())]
            }
            State::HumanSpeaking => {
                self.last_human_activity_at = now;
                if frame.rms < SILENCE_THRESHOLD {
                    let since = *self.sub_silence_since.get_or_insert(now);
                    if now.duration_since(since) >= END_OF_TURN_SILENCE {
                        self.state = State::Processing;
                        self.sub_silence_since = None;
                        self.filler_requested_this_turn = false;
                        self.last_model_audio_at = None;
                    }
                } else {
                    self.sub_silence_since = None;
                }
                vec![Action::ForwardAudioToModel(frame.pcm16_16k.clone())]
            }
            State::Responding => self.on_caller_frame_while_responding(frame, now),
            _ => vec![],
        }
    }

    /// Barge-in gate (spec §4.4): a three-tier step function on
    /// `interruption_sensitivity`, not a continuous interpolation.
    /// `s >= 0.8`: any frame above [`SILENCE_THRESHOLD`] interrupts.
    /// `0.4 <= s < 0.8`: the frame must also clear a fixed confidence bar
    /// (`min(rms / LOUD_THRESHOLD, 1) > 0.7`, i.e. rms > 0.7 * LOUD_THRESHOLD).
    /// `s < 0.4`: only frames above [`LOUD_THRESHOLD`] interrupt.
    fn on_caller_frame_while_responding(&mut self, frame: &CallerFrame, now: Instant) -> Vec<Action> {
        let barges_in = if self.interruption_sensitivity >= 0.8 {
            frame.rms > SILENCE_THRESHOLD
        } else if self.interruption_sensitivity >= 0.4 {
            let confidence = (frame.rms / LOUD_THRESHOLD).min(1.0);
            frame.rms > SILENCE_THRESHOLD && confidence > 0.7
        } else {
            frame.rms > LOUD_THRESHOLD
        };

        if barges_in {
            // Back to LISTENING, not straight to HUMAN_SPEAKING (spec §4.4,
            // §8 scenario 2) — the next supra-SILENCE frame drives
            // HUMAN_SPEAKING through the normal LISTENING path.
            self.state = State::Listening;
            self.last_human_activity_at = now;
            self.sub_silence_since = None;
            return vec![Action::SendBargeIn, Action::ForwardAudioToModel(frame.pcm16_16k.clone())];
        }
        vec![]
    }

    /// A decoded frame arrived from the model session.
    pub fn on_model_frame(&mut self, frame: &ModelFrame) -> Vec<Action> {
        let now = Instant::now();
        match frame {
            ModelFrame::Audio(pcm24k) => {
                self.last_model_audio_at = Some(now);
                self.consecutive_response_timeouts = 0;
                if matches!(self.state, State::Processing) {
                    self.state = State::Responding;
                }
                if matches!(self.state, State::Responding) {
                    vec![Action::PlayModelAudio(pcm24k.clone())]
                } else {
                    vec![]
                }
            }
            ModelFrame::TurnComplete => {
                if matches!(self.state, State::Responding | State::Processing) {
                    self.state = State::ResponseComplete;
                    self.echo_guard_until = Some(now + ECHO_GUARD);
                }
                vec![]
            }
            ModelFrame::Interrupted => {
                if matches!(self.state, State::Responding) {
                    self.state = State::HumanSpeaking;
                }
                vec![]
            }
            ModelFrame::Error(_) => vec![Action::EndCall(EndReason::FatalUpstream)],
            _ => vec![],
        }
    }

    /// Call this once the orchestrator has flushed the completed response
    /// back to the carrier; returns to LISTENING for the next human turn.
    pub fn response_flushed(&mut self) {
        if self.state == State::ResponseComplete {
            self.state = State::Listening;
        }
    }

    /// Periodic tick for timeout-driven transitions — call roughly every
    /// 100ms from the orchestrator's event loop.
    pub fn on_tick(&mut self) -> Vec<Action> {
        let now = Instant::now();
        let mut actions = Vec::new();

        if now.duration_since(self.call_started_at) >= self.max_call_duration {
            self.state = State::Ending;
            return vec![Action::EndCall(EndReason::MaxDuration)];
        }

        match self.state {
            State::Processing | State::Responding => {
                let waiting_since = self.last_model_audio_at.unwrap_or(self.last_human_activity_at);
                if now.duration_since(waiting_since) >= RESPONSE_TIMEOUT {
                    self.consecutive_response_timeouts += 1;
                    if self.consecutive_response_timeouts >= 2 {
                        self.state = State::Ending;
                        return vec![Action::EndCall(EndReason::ResponseTimeout)];
                    }
                    self.state = State::Listening;
                    self.last_human_activity_at = now;
                    self.last_model_audio_at = None;
                    self.filler_requested_this_turn = false;
                    self.sub_silence_since = None;
                    return vec![Action::PlayRecoveryMessage];
                }
                if !self.filler_requested_this_turn
                    && self.last_model_audio_at.is_none()
                    && now.duration_since(self.last_human_activity_at) >= FILLER_DELAY
                {
                    self.filler_requested_this_turn = true;
                    actions.push(Action::RequestFillerClip);
                }
            }
            State::Listening if now.duration_since(self.last_human_activity_at) >= self.silence_timeout => {
                self.state = State::Ending;
                return vec![Action::EndCall(EndReason::SilenceTimeout)];
            }
            _ => {}
        }

        actions
    }

    /// The carrier closed its media stream.
    pub fn carrier_closed(&mut self) -> Vec<Action> {
        self.state = State::CallEnded;
        vec![Action::EndCall(EndReason::CarrierHangup)]
    }

    /// Idempotent: repeated calls after the first are no-ops (spec §9 open
    /// question — `stop()` only fires meaningfully once per call).
    pub fn stop(&mut self) {
        self.state = State::CallEnded;
    }

    fn in_echo_guard(&self, now: Instant) -> bool {
        self.echo_guard_until.map(|until| now < until).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(rms_source: i16) -> CallerFrame {
        CallerFrame::new(vec![rms_source; CallerFrame::SAMPLES_PER_FRAME], 0, 0)
    }

    fn silent_frame() -> CallerFrame {
        CallerFrame::new(vec![0i16; CallerFrame::SAMPLES_PER_FRAME], 0, 0)
    }

    fn loud_frame() -> CallerFrame {
        frame(i16::MAX / 2)
    }

    #[test]
    fn start_plays_welcome_then_transitions_on_playback_done() {
        let mut sm = StateMachine::new(0.5, DEFAULT_MAX_CALL_DURATION, DEFAULT_SILENCE_TIMEOUT);
        let actions = sm.start();
        assert_eq!(actions, vec![Action::PlayWelcome]);
        assert_eq!(sm.state(), State::Welcome);
        sm.welcome_played();
        assert_eq!(sm.state(), State::Listening);
    }

    #[test]
    fn loud_frame_moves_listening_to_human_speaking() {
        let mut sm = StateMachine::new(0.5, DEFAULT_MAX_CALL_DURATION, DEFAULT_SILENCE_TIMEOUT);
        sm.start();
        sm.welcome_played();
        sm.on_caller_frame(&loud_frame());
        assert_eq!(sm.state(), State::HumanSpeaking);
    }

    #[test]
    fn sustained_silence_ends_human_turn() {
        let mut sm = StateMachine::new(0.5, DEFAULT_MAX_CALL_DURATION, DEFAULT_SILENCE_TIMEOUT);
        sm.start();
        sm.welcome_played();
        sm.on_caller_frame(&loud_frame());
        assert_eq!(sm.state(), State::HumanSpeaking);

        sm.on_caller_frame(&silent_frame());
        assert_eq!(sm.state(), State::HumanSpeaking); // not yet 800ms

        std::thread::sleep(END_OF_TURN_SILENCE + Duration::from_millis(50));
        sm.on_caller_frame(&silent_frame());
        assert_eq!(sm.state(), State::Processing);
    }

    #[test]
    fn max_sensitivity_barge_in_triggers_below_loud_threshold() {
        let mut sm = StateMachine::new(1.0, DEFAULT_MAX_CALL_DURATION, DEFAULT_SILENCE_TIMEOUT);
        sm.start();
        sm.welcome_played();
        sm.on_caller_frame(&loud_frame());
        sm.on_caller_frame(&silent_frame());
        std::thread::sleep(END_OF_TURN_SILENCE + Duration::from_millis(50));
        sm.on_caller_frame(&silent_frame());
        assert_eq!(sm.state(), State::Processing);
        sm.on_model_frame(&ModelFrame::Audio(vec![0; 10]));
        assert_eq!(sm.state(), State::Responding);

        // a moderate-energy frame at max sensitivity should barge in
        let actions = sm.on_caller_frame(&frame(2000));
        assert!(actions.contains(&Action::SendBargeIn));
        assert_eq!(sm.state(), State::Listening);
    }

    #[test]
    fn zero_sensitivity_only_loud_frames_barge_in() {
        let mut sm = StateMachine::new(0.0, DEFAULT_MAX_CALL_DURATION, DEFAULT_SILENCE_TIMEOUT);
        sm.start();
        sm.welcome_played();
        sm.on_caller_frame(&loud_frame());
        sm.on_caller_frame(&silent_frame());
        std::thread::sleep(END_OF_TURN_SILENCE + Duration::from_millis(50));
        sm.on_caller_frame(&silent_frame());
        sm.on_model_frame(&ModelFrame::Audio(vec![0; 10]));
        assert_eq!(sm.state(), State::Responding);

        let actions = sm.on_caller_frame(&frame(1000));
        assert!(actions.is_empty());
        assert_eq!(sm.state(), State::Responding);

        let actions = sm.on_caller_frame(&loud_frame());
        assert!(actions.contains(&Action::SendBargeIn));
    }

    #[test]
    fn mid_sensitivity_requires_confidence_above_seven_tenths() {
        let mut sm = StateMachine::new(0.5, DEFAULT_MAX_CALL_DURATION, DEFAULT_SILENCE_TIMEOUT);
        sm.start();
        sm.welcome_played();
        sm.on_caller_frame(&loud_frame());
        sm.on_caller_frame(&silent_frame());
        std::thread::sleep(END_OF_TURN_SILENCE + Duration::from_millis(50));
        sm.on_caller_frame(&silent_frame());
        sm.on_model_frame(&ModelFrame::Audio(vec![0; 10]));
        assert_eq!(sm.state(), State::Responding);

        // rms ~0.0305, above SILENCE_THRESHOLD but confidence = 0.0305/0.05 = 0.61 <= 0.7
        let actions = sm.on_caller_frame(&frame(1000));
        assert!(actions.is_empty());
        assert_eq!(sm.state(), State::Responding);

        // rms ~0.061, confidence clamps to 1.0 > 0.7
        let actions = sm.on_caller_frame(&frame(2000));
        assert!(actions.contains(&Action::SendBargeIn));
        assert_eq!(sm.state(), State::Listening);
    }

    #[test]
    fn high_sensitivity_barges_in_just_above_silence() {
        let mut sm = StateMachine::new(0.85, DEFAULT_MAX_CALL_DURATION, DEFAULT_SILENCE_TIMEOUT);
        sm.start();
        sm.welcome_played();
        sm.on_caller_frame(&loud_frame());
        sm.on_caller_frame(&silent_frame());
        std::thread::sleep(END_OF_TURN_SILENCE + Duration::from_millis(50));
        sm.on_caller_frame(&silent_frame());
        sm.on_model_frame(&ModelFrame::Audio(vec![0; 10]));
        assert_eq!(sm.state(), State::Responding);

        // rms ~0.0305, well above SILENCE_THRESHOLD (0.008) and s >= 0.8 bypasses
        // the confidence tier entirely.
        let actions = sm.on_caller_frame(&frame(1000));
        assert!(actions.contains(&Action::SendBargeIn));
        assert_eq!(sm.state(), State::Listening);
    }

    #[test]
    fn model_audio_while_responding_emits_play_action() {
        let mut sm = StateMachine::new(0.5, DEFAULT_MAX_CALL_DURATION, DEFAULT_SILENCE_TIMEOUT);
        sm.start();
        sm.welcome_played();
        sm.on_caller_frame(&loud_frame());
        sm.on_caller_frame(&silent_frame());
        std::thread::sleep(END_OF_TURN_SILENCE + Duration::from_millis(50));
        sm.on_caller_frame(&silent_frame());
        assert_eq!(sm.state(), State::Processing);

        let actions = sm.on_model_frame(&ModelFrame::Audio(vec![1, 2, 3]));
        assert_eq!(sm.state(), State::Responding);
        assert_eq!(actions, vec![Action::PlayModelAudio(vec![1, 2, 3])]);

        let actions = sm.on_model_frame(&ModelFrame::Audio(vec![4, 5]));
        assert_eq!(actions, vec![Action::PlayModelAudio(vec![4, 5])]);
    }

    #[test]
    fn turn_complete_enters_echo_guard_and_suppresses_frames() {
        let mut sm = StateMachine::new(0.5, DEFAULT_MAX_CALL_DURATION, DEFAULT_SILENCE_TIMEOUT);
        sm.start();
        sm.welcome_played();
        sm.on_caller_frame(&loud_frame());
        sm.on_caller_frame(&silent_frame());
        std::thread::sleep(END_OF_TURN_SILENCE + Duration::from_millis(50));
        sm.on_caller_frame(&silent_frame());
        sm.on_model_frame(&ModelFrame::Audio(vec![0; 10]));
        sm.on_model_frame(&ModelFrame::TurnComplete);
        assert_eq!(sm.state(), State::ResponseComplete);

        let actions = sm.on_caller_frame(&loud_frame());
        assert!(actions.is_empty());
        assert_eq!(sm.state(), State::ResponseComplete);

        sm.response_flushed();
        assert_eq!(sm.state(), State::Listening);
    }

    #[test]
    fn model_error_ends_call() {
        let mut sm = StateMachine::new(0.5, DEFAULT_MAX_CALL_DURATION, DEFAULT_SILENCE_TIMEOUT);
        let actions = sm.on_model_frame(&ModelFrame::Error("quota".into()));
        assert_eq!(actions, vec![Action::EndCall(EndReason::FatalUpstream)]);
    }

    fn enter_processing_with_no_model_audio(sm: &mut StateMachine) {
        sm.on_caller_frame(&loud_frame());
        sm.on_caller_frame(&silent_frame());
        std::thread::sleep(END_OF_TURN_SILENCE + Duration::from_millis(50));
        sm.on_caller_frame(&silent_frame());
        assert_eq!(sm.state(), State::Processing);
    }

    #[test]
    fn first_response_timeout_returns_to_listening_with_recovery_message() {
        let mut sm = StateMachine::new(0.5, DEFAULT_MAX_CALL_DURATION, DEFAULT_SILENCE_TIMEOUT);
        sm.start();
        sm.welcome_played();
        enter_processing_with_no_model_audio(&mut sm);

        // No model audio has arrived yet: back-date the clock the timeout is
        // measured against instead of actually sleeping 15s.
        sm.last_human_activity_at -= RESPONSE_TIMEOUT;

        let actions = sm.on_tick();
        assert_eq!(actions, vec![Action::PlayRecoveryMessage]);
        assert_eq!(sm.state(), State::Listening);
        assert_eq!(sm.consecutive_response_timeouts, 1);
    }

    #[test]
    fn second_consecutive_response_timeout_ends_call() {
        let mut sm = StateMachine::new(0.5, DEFAULT_MAX_CALL_DURATION, DEFAULT_SILENCE_TIMEOUT);
        sm.start();
        sm.welcome_played();
        enter_processing_with_no_model_audio(&mut sm);
        sm.last_human_activity_at -= RESPONSE_TIMEOUT;
        let actions = sm.on_tick();
        assert_eq!(actions, vec![Action::PlayRecoveryMessage]);
        assert_eq!(sm.state(), State::Listening);

        // A second human turn that the model also never answers.
        enter_processing_with_no_model_audio(&mut sm);
        sm.last_human_activity_at -= RESPONSE_TIMEOUT;
        let actions = sm.on_tick();
        assert_eq!(actions, vec![Action::EndCall(EndReason::ResponseTimeout)]);
        assert_eq!(sm.state(), State::Ending);
    }

    #[test]
    fn response_timeout_counter_resets_once_model_answers() {
        let mut sm = StateMachine::new(0.5, DEFAULT_MAX_CALL_DURATION, DEFAULT_SILENCE_TIMEOUT);
        sm.start();
        sm.welcome_played();
        enter_processing_with_no_model_audio(&mut sm);
        sm.last_human_activity_at -= RESPONSE_TIMEOUT;
        sm.on_tick();
        assert_eq!(sm.consecutive_response_timeouts, 1);

        enter_processing_with_no_model_audio(&mut sm);
        sm.on_model_frame(&ModelFrame::Audio(vec![0; 10]));
        assert_eq!(sm.consecutive_response_timeouts, 0);
    }

    #[test]
    fn silence_timeout_ends_call_while_listening() {
        let mut sm = StateMachine::new(0.5, DEFAULT_MAX_CALL_DURATION, Duration::from_millis(50));
        sm.start();
        sm.welcome_played();
        std::thread::sleep(Duration::from_millis(80));
        let actions = sm.on_tick();
        assert_eq!(actions, vec![Action::EndCall(EndReason::SilenceTimeout)]);
        assert_eq!(sm.state(), State::Ending);
    }

    #[test]
    fn max_call_duration_ends_call_from_any_state() {
        let mut sm = StateMachine::new(0.5, Duration::from_millis(50), DEFAULT_SILENCE_TIMEOUT);
        std::thread::sleep(Duration::from_millis(80));
        let actions = sm.on_tick();
        assert_eq!(actions, vec![Action::EndCall(EndReason::MaxDuration)]);
    }

    #[test]
    fn stop_is_idempotent() {
        let mut sm = StateMachine::new(0.5, DEFAULT_MAX_CALL_DURATION, DEFAULT_SILENCE_TIMEOUT);
        sm.stop();
        assert_eq!(sm.state(), State::CallEnded);
        sm.stop();
        assert_eq!(sm.state(), State::CallEnded);
    }

    #[test]
    fn carrier_close_ends_call() {
        let mut sm = StateMachine::new(0.5, DEFAULT_MAX_CALL_DURATION, DEFAULT_SILENCE_TIMEOUT);
        let actions = sm.carrier_closed();
        assert_eq!(actions, vec![Action::EndCall(EndReason::CarrierHangup)]);
        assert_eq!(sm.state(), State::CallEnded);
    }
}
