use std::collections::BTreeMap;
use std::error::Error;
use std::io::Cursor;
use std::sync::{Arc, Mutex};

use crossbeam_channel::{unbounded, Receiver};
use usiagent_core::{
    AgentConfig, AgentInput, AgentOutput, AgentRuntime, BasePosition, BestMove, ConvertError,
    DispatchError, ErrorReporter, GameResult, GoLimit, HandlerError, OptionValue, Phase,
    PositionSetup, ProtocolReader, RunEnd, RunningError, StartupError, SystemEvent, UserEvent,
};

mod common;
use common::{mv, ScriptedPlayer, ScriptedRules, Turn};

fn runtime(player: ScriptedPlayer) -> AgentRuntime<ScriptedPlayer, ScriptedRules> {
    AgentRuntime::new(player, Arc::new(ScriptedRules::default()), AgentConfig::default())
}

fn feed(inputs: Vec<AgentInput>) -> Receiver<AgentInput> {
    let (tx, rx) = unbounded();
    for input in inputs {
        tx.send(input).unwrap();
    }
    rx
}

fn startpos(moves: Vec<usiagent_core::Move>) -> SystemEvent {
    SystemEvent::Position(PositionSetup {
        base: BasePosition::Startpos,
        moves,
    })
}

#[test]
fn full_game_conversation_produces_protocol_outputs() {
    let player = ScriptedPlayer::new([Turn::FirstLegal]);
    let journal = player.journal.clone();
    let agent = runtime(player);
    let session = agent.session();

    let mut source = feed(vec![
        SystemEvent::Usi.into(),
        SystemEvent::IsReady.into(),
        SystemEvent::UsiNewGame.into(),
        startpos(vec![]).into(),
        SystemEvent::Go(GoLimit::Infinite).into(),
        SystemEvent::GameOver(GameResult::Win).into(),
        SystemEvent::Quit.into(),
    ]);
    let (out_tx, out_rx) = unbounded();

    let outcome = agent.start(&mut source, out_tx).unwrap();
    assert_eq!(outcome.end, RunEnd::Quit);
    assert_eq!(outcome.events, 7);

    let outputs: Vec<AgentOutput> = out_rx.try_iter().collect();
    assert_eq!(
        outputs,
        vec![
            AgentOutput::Id {
                name: "Scripted".into(),
                author: "Test Suite".into(),
            },
            AgentOutput::UsiOk,
            AgentOutput::ReadyOk,
            AgentOutput::BestMove(BestMove::Move(mv((7, 7), (7, 6)))),
        ]
    );
    assert_eq!(
        *journal.lock().unwrap(),
        vec!["isready", "usinewgame", "go", "gameover Win", "quit"]
    );

    let snapshot = session.snapshot().unwrap();
    assert_eq!(snapshot.phase, Phase::Quit);
    assert_eq!(snapshot.games, 1);
    assert_eq!(snapshot.events, 7);
}

#[test]
fn closed_input_ends_the_run() {
    let agent = runtime(ScriptedPlayer::default());
    let (tx, mut rx) = unbounded::<AgentInput>();
    tx.send(SystemEvent::Usi.into()).unwrap();
    drop(tx);
    let (out_tx, _out_rx) = unbounded();

    let outcome = agent.start(&mut rx, out_tx).unwrap();
    assert_eq!(outcome.end, RunEnd::InputClosed);
    assert_eq!(outcome.events, 1);
}

#[test]
fn stop_handle_ends_the_run_before_the_next_dispatch() {
    let agent = runtime(ScriptedPlayer::default());
    agent.stop_handle().request_stop();
    let (_tx, mut rx) = unbounded::<AgentInput>();
    let (out_tx, _out_rx) = unbounded();

    let outcome = agent.start(&mut rx, out_tx).unwrap();
    assert_eq!(outcome.end, RunEnd::Stopped);
    assert_eq!(outcome.events, 0);
}

#[test]
fn user_quit_stops_the_agent() {
    let player = ScriptedPlayer::default();
    let journal = player.journal.clone();
    let agent = runtime(player);
    let mut source = feed(vec![UserEvent::Stop.into(), UserEvent::Quit.into()]);
    let (out_tx, _out_rx) = unbounded();

    let outcome = agent.start(&mut source, out_tx).unwrap();
    assert_eq!(outcome.end, RunEnd::Quit);
    assert_eq!(*journal.lock().unwrap(), vec!["stop", "quit"]);
}

#[test]
fn go_without_position_is_an_invalid_state() {
    let agent = runtime(ScriptedPlayer::default());
    let mut source = feed(vec![
        SystemEvent::IsReady.into(),
        SystemEvent::UsiNewGame.into(),
        SystemEvent::Go(GoLimit::Infinite).into(),
    ]);
    let (out_tx, _out_rx) = unbounded();

    let err = agent.start(&mut source, out_tx).unwrap_err();
    assert!(matches!(
        err,
        RunningError::Dispatch(DispatchError::Handler(HandlerError::InvalidState {
            event: "go",
            ..
        }))
    ));
}

#[test]
fn usinewgame_before_isready_is_rejected() {
    let agent = runtime(ScriptedPlayer::default());
    let mut source = feed(vec![SystemEvent::UsiNewGame.into()]);
    let (out_tx, _out_rx) = unbounded();

    let err = agent.start(&mut source, out_tx).unwrap_err();
    assert!(err.to_string().contains("isready has not been answered"));
}

#[test]
fn illegal_move_in_position_names_the_ply() {
    let rules = ScriptedRules {
        reject_ply: Some(2),
        ..ScriptedRules::default()
    };
    let agent = AgentRuntime::new(ScriptedPlayer::default(), Arc::new(rules), AgentConfig::default());
    let mut source = feed(vec![
        SystemEvent::IsReady.into(),
        SystemEvent::UsiNewGame.into(),
        startpos(vec![mv((7, 7), (7, 6)), mv((3, 3), (3, 4))]).into(),
    ]);
    let (out_tx, _out_rx) = unbounded();

    let err = agent.start(&mut source, out_tx).unwrap_err();
    match err {
        RunningError::Dispatch(DispatchError::Handler(HandlerError::IllegalMove { ply, mv: m })) => {
            assert_eq!(ply, 2);
            assert_eq!(m, mv((3, 3), (3, 4)));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn player_failure_surfaces_through_the_run() {
    let agent = runtime(ScriptedPlayer::new([Turn::Fail("out of book".into())]));
    let mut source = feed(vec![
        SystemEvent::IsReady.into(),
        SystemEvent::UsiNewGame.into(),
        startpos(vec![]).into(),
        SystemEvent::Go(GoLimit::Infinite).into(),
    ]);
    let (out_tx, _out_rx) = unbounded();

    let err = agent.start(&mut source, out_tx).unwrap_err();
    assert!(err.to_string().contains("out of book"));
}

#[test]
fn rejected_startup_option_is_a_startup_error() {
    let player = ScriptedPlayer {
        reject_option: Some("Threads".into()),
        ..ScriptedPlayer::default()
    };
    let config = AgentConfig {
        options: BTreeMap::from([("Threads".to_string(), OptionValue::Num(4))]),
        ..AgentConfig::default()
    };
    let agent = AgentRuntime::new(player, Arc::new(ScriptedRules::default()), config);
    let (_tx, mut rx) = unbounded::<AgentInput>();
    let (out_tx, _out_rx) = unbounded();

    let err = agent.start(&mut rx, out_tx).unwrap_err();
    assert!(matches!(
        err,
        RunningError::Startup(StartupError::Player { ref name, .. }) if name == "Threads"
    ));
}

#[test]
fn malformed_lines_are_skipped_by_default() {
    let agent = runtime(ScriptedPlayer::default());
    let mut reader = ProtocolReader::new(Cursor::new("usi\nteleport home\nquit\n"));
    let (out_tx, _out_rx) = unbounded();

    let outcome = agent.start(&mut reader, out_tx).unwrap();
    assert_eq!(outcome.end, RunEnd::Quit);
    assert_eq!(outcome.events, 2);
}

#[test]
fn strict_protocol_fails_on_malformed_number() {
    let config = AgentConfig {
        strict_protocol: true,
        ..AgentConfig::default()
    };
    let agent = AgentRuntime::new(
        ScriptedPlayer::default(),
        Arc::new(ScriptedRules::default()),
        config,
    );
    let mut reader = ProtocolReader::new(Cursor::new("usi\ngo btime abc\n"));
    let (out_tx, _out_rx) = unbounded();

    let err = agent.start(&mut reader, out_tx).unwrap_err();
    assert!(matches!(
        err,
        RunningError::Convert(ConvertError::InvalidNumber { ref token, .. }) if token == "abc"
    ));
    assert!(err.to_string().contains("abc"));
}

#[derive(Default)]
struct CountingReporter(Mutex<Vec<String>>);

impl ErrorReporter for CountingReporter {
    fn report(&self, error: &(dyn Error + 'static)) {
        self.0.lock().unwrap().push(error.to_string());
    }
}

#[test]
fn failed_run_is_reported_once() {
    let reporter = Arc::new(CountingReporter::default());
    let agent = runtime(ScriptedPlayer::default()).with_reporter(reporter.clone());
    let mut source = feed(vec![SystemEvent::Go(GoLimit::Infinite).into()]);
    let (out_tx, _out_rx) = unbounded();

    assert!(agent.start(&mut source, out_tx).is_err());
    let reports = reporter.0.lock().unwrap();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].contains("no position has been set"));
}

#[test]
fn info_lines_precede_the_bestmove() {
    let agent = runtime(ScriptedPlayer::new([Turn::Say("depth 1 score cp 30".into())]));
    let mut source = feed(vec![
        SystemEvent::IsReady.into(),
        SystemEvent::UsiNewGame.into(),
        startpos(vec![]).into(),
        SystemEvent::Go(GoLimit::Infinite).into(),
    ]);
    let (out_tx, out_rx) = unbounded();

    agent.start(&mut source, out_tx).unwrap();
    let outputs: Vec<AgentOutput> = out_rx.try_iter().collect();
    assert_eq!(
        outputs,
        vec![
            AgentOutput::ReadyOk,
            AgentOutput::Info("depth 1 score cp 30".into()),
            AgentOutput::BestMove(BestMove::Move(mv((7, 7), (7, 6)))),
        ]
    );
}

#[test]
fn closed_output_after_a_stop_request_is_not_reported() {
    let reporter = Arc::new(CountingReporter::default());
    let agent = runtime(ScriptedPlayer::default()).with_reporter(reporter.clone());
    agent.player().lock().unwrap().stop_on_ready = Some(agent.stop_handle());
    let mut source = feed(vec![SystemEvent::IsReady.into()]);
    let (out_tx, out_rx) = unbounded::<AgentOutput>();
    drop(out_rx);

    let err = agent.start(&mut source, out_tx).unwrap_err();
    assert!(matches!(
        err,
        RunningError::Dispatch(DispatchError::Handler(HandlerError::OutputClosed))
    ));
    assert!(reporter.0.lock().unwrap().is_empty());
}

#[test]
fn closed_output_without_a_stop_request_is_reported() {
    let reporter = Arc::new(CountingReporter::default());
    let agent = runtime(ScriptedPlayer::default()).with_reporter(reporter.clone());
    let mut source = feed(vec![SystemEvent::IsReady.into()]);
    let (out_tx, out_rx) = unbounded::<AgentOutput>();
    drop(out_rx);

    assert!(agent.start(&mut source, out_tx).is_err());
    let reports = reporter.0.lock().unwrap();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].contains("output sink is closed"));
}
