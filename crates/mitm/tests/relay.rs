//! End-to-end relay tests with a scripted handset and an emulated card

mod common;

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use bytes::Bytes;
use common::{ScriptedHandset, relay, run_script};
use hex_literal::hex;
use simrelay_apdu_core::CardTransport;
use simrelay_mitm::{
    CaptureKind, EmulatedCard, Error, InterceptLog, InterceptPipeline, MemorySink, PatternRule,
    PatternTable, Phase, RelayConfig, SessionRelay, Tag,
};

fn stub_card() -> EmulatedCard {
    EmulatedCard::new(Bytes::from_static(&hex!("3B00")))
}

#[test]
fn test_reset_then_zero_length_command() {
    let handset = ScriptedHandset::new().reset().send(&hex!("00A4000000"));
    let card = stub_card().with_response(
        Bytes::from_static(&hex!("00A40000")),
        Bytes::from_static(&hex!("9000")),
    );
    let (mut relay, sink) = relay(handset, card, InterceptPipeline::default());
    run_script(&mut relay);

    assert_eq!(
        relay.handset().writes(),
        &[
            Bytes::from_static(&hex!("3B00")),
            Bytes::from_static(&hex!("A4")),
            Bytes::from_static(&hex!("9000")),
        ]
    );
    assert_eq!(relay.backend().received(), &[Bytes::from_static(&hex!("00A40000"))]);
    assert_eq!(relay.session().phase(), Phase::Complete);

    let captures = sink.captures();
    assert_eq!(captures.len(), 2);
    assert_eq!(captures[0].kind, CaptureKind::Atr);
    assert_eq!(captures[1].kind, CaptureKind::Apdu);
    assert_eq!(captures[1].bytes.as_ref(), &hex!("00A4000000 9000"));
}

#[test]
fn test_write_timeout_does_not_stall_the_command() {
    // The INS echo is lost; the card is still asked and the handset gets the status
    let handset = ScriptedHandset::new()
        .reset()
        .time_out_write(2)
        .send(&hex!("00A4000000"))
        .send(&hex!("A0F2000016"));
    let card = stub_card().with_response(
        Bytes::from_static(&hex!("00A40000")),
        Bytes::from_static(&hex!("9000")),
    );
    let (mut relay, _sink) = relay(handset, card, InterceptPipeline::default());
    run_script(&mut relay);

    assert_eq!(
        relay.handset().writes(),
        &[
            Bytes::from_static(&hex!("3B00")),
            Bytes::from_static(&hex!("9000")),
            Bytes::from_static(&hex!("6D00")),
        ]
    );
    assert_eq!(
        relay.backend().received(),
        &[Bytes::from_static(&hex!("00A40000")), Bytes::from_static(&hex!("A0F2000016"))]
    );
    assert_eq!(relay.session().phase(), Phase::Complete);
    assert_eq!(relay.session().stats().commands, 2);
}

#[test]
fn test_round_trips_keep_arrival_order() {
    let fcp: Vec<u8> = (0..0x17).collect();
    let mut get_response = fcp.clone();
    get_response.extend_from_slice(&hex!("9000"));

    let handset = ScriptedHandset::new()
        .reset()
        // SELECT MF and READ BINARY in one transfer
        .send(&hex!("A0A40000023F00 A0B0000002"))
        .send(&hex!("A0C0000017"));
    let card = stub_card()
        .with_response(
            Bytes::from_static(&hex!("A0A40000023F00")),
            Bytes::from_static(&hex!("9F17")),
        )
        .with_response(
            Bytes::from_static(&hex!("A0B0000002")),
            Bytes::from_static(&hex!("12349000")),
        )
        .with_response(Bytes::from_static(&hex!("A0C0000017")), Bytes::from(get_response));
    let (mut relay, sink) = relay(handset, card, InterceptPipeline::default());
    run_script(&mut relay);

    assert_eq!(
        relay.backend().received(),
        &[
            Bytes::from_static(&hex!("A0A40000023F00")),
            Bytes::from_static(&hex!("A0B0000002")),
            Bytes::from_static(&hex!("A0C0000017")),
        ]
    );

    let mut expected = hex!("3B00 A4 9F17 B0 1234 9000 C0").to_vec();
    expected.extend_from_slice(&fcp);
    expected.extend_from_slice(&hex!("9000"));
    assert_eq!(relay.handset().received(), expected);

    let apdus: Vec<_> = sink
        .captures()
        .into_iter()
        .filter(|c| c.kind == CaptureKind::Apdu)
        .map(|c| c.bytes[1])
        .collect();
    assert_eq!(apdus, vec![0xA4, 0xB0, 0xC0]);
    assert_eq!(relay.session().stats().commands, 3);
}

#[test]
fn test_pts_is_echoed() {
    let handset = ScriptedHandset::new().reset().send(&hex!("FF00FF"));
    let (mut relay, sink) = relay(handset, stub_card(), InterceptPipeline::default());
    run_script(&mut relay);

    assert_eq!(relay.handset().received(), hex!("3B00 FF00FF"));
    assert!(relay.backend().received().is_empty());
    assert_eq!(relay.session().phase(), Phase::CommandHeader);
    assert_eq!(sink.captures()[1].kind, CaptureKind::PpsRequest);
}

#[test]
fn test_substituted_atr_reaches_handset_but_not_sink() {
    let alternate = hex!("3B9994004A4C31000000000000");
    let table = PatternTable::new().with_rule(PatternRule::new(
        Tag::Atr,
        Bytes::from_static(&hex!("3B00")),
        Bytes::copy_from_slice(&alternate),
    ));
    let log = InterceptLog::new();
    let pipeline = InterceptPipeline::new(table).with_log(log.clone());

    let handset = ScriptedHandset::new().reset();
    let (mut relay, sink) = relay(handset, stub_card(), pipeline);
    run_script(&mut relay);

    assert_eq!(relay.handset().received(), alternate);

    let captures = sink.captures();
    assert_eq!(captures.len(), 1);
    assert_eq!(captures[0].bytes.as_ref(), &hex!("3B00"));

    let records = log.records();
    assert_eq!(records.len(), 1);
    assert!(records[0].substituted());
}

#[test]
fn test_substituted_command_data_goes_to_card() {
    let table = PatternTable::new().with_rule(PatternRule::new(
        Tag::ResponseData,
        Bytes::from_static(&hex!("6F07")),
        Bytes::from_static(&hex!("6F38")),
    ));
    let handset = ScriptedHandset::new().reset().send(&hex!("A0A40000026F07"));
    let card = stub_card().with_response(
        Bytes::from_static(&hex!("A0A40000026F38")),
        Bytes::from_static(&hex!("9F0F")),
    );
    let (mut relay, sink) = relay(handset, card, InterceptPipeline::new(table));
    run_script(&mut relay);

    assert_eq!(relay.handset().received(), hex!("3B00 A4 9F0F"));
    // The capture records what the handset sent
    let apdu = sink.captures().pop().unwrap();
    assert_eq!(apdu.bytes.as_ref(), &hex!("A0A40000026F07 9F0F"));
}

#[test]
fn test_reset_discards_command_in_flight() {
    let handset = ScriptedHandset::new()
        .reset()
        .send(&hex!("A0A40000023F"))
        .reset()
        .send(&hex!("A0F2000016"));
    let card = stub_card();
    let (mut relay, _sink) = relay(handset, card, InterceptPipeline::default());
    run_script(&mut relay);

    // ATR, echo, then a fresh ATR, then STATUS answered by the default 6D00
    assert_eq!(relay.handset().received(), hex!("3B00 A4 3B00 6D00"));
    assert_eq!(relay.session().id(), 2);
    assert_eq!(relay.backend().received(), &[Bytes::from_static(&hex!("A0F2000016"))]);
}

#[test]
fn test_data_before_reset_is_recovered() {
    let handset = ScriptedHandset::new()
        .send(&hex!("A0A4"))
        .interrupt(b"X")
        .reset()
        .send(&hex!("A0A4000000"));
    let (mut relay, _sink) = relay(handset, stub_card(), InterceptPipeline::default());
    run_script(&mut relay);

    // The stray bytes and the unknown interrupt produce nothing
    assert_eq!(relay.handset().received(), hex!("3B00 A4 6D00"));
    assert_eq!(relay.session().id(), 1);
}

#[test]
fn test_incoming_answer_is_held_for_get_response() {
    let handset = ScriptedHandset::new()
        .reset()
        .send(&hex!("00A40004023F00"))
        .send(&hex!("00C0000003"));
    let card = stub_card().with_response(
        Bytes::from_static(&hex!("00A40004023F00")),
        Bytes::from_static(&hex!("6203019000")),
    );
    let (mut relay, _sink) = relay(handset, card, InterceptPipeline::default());
    run_script(&mut relay);

    assert_eq!(relay.handset().received(), hex!("3B00 A4 6103 C0 620301 9000"));
    // GET RESPONSE never reached the card
    assert_eq!(relay.backend().received().len(), 1);
}

#[derive(Debug)]
struct FailingCard {
    closed: Arc<AtomicBool>,
}

impl CardTransport for FailingCard {
    fn atr(&mut self) -> Result<Bytes, simrelay_apdu_core::Error> {
        Ok(Bytes::from_static(&hex!("3B00")))
    }

    fn do_transmit_raw(&mut self, _command: &[u8]) -> Result<Bytes, simrelay_apdu_core::Error> {
        Err(simrelay_apdu_core::Error::Timeout)
    }

    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    fn reset(&mut self) -> Result<(), simrelay_apdu_core::Error> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), simrelay_apdu_core::Error> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn test_backend_failure_answers_no_precise_diagnosis() {
    let closed = Arc::new(AtomicBool::new(false));
    let handset = ScriptedHandset::new().reset().send(&hex!("A0B0000002"));
    let mut relay = SessionRelay::new(
        handset,
        FailingCard {
            closed: closed.clone(),
        },
        InterceptPipeline::default(),
        Box::new(MemorySink::new()),
        RelayConfig::default(),
    );

    while !relay.handset().is_done() {
        relay.poll_once().unwrap();
    }
    assert_eq!(relay.handset().received(), hex!("3B00 6F00"));
    assert_eq!(relay.session().phase(), Phase::Complete);

    drop(relay);
    assert!(closed.load(Ordering::SeqCst));
}

#[test]
fn test_transport_failure_is_fatal() {
    let handset = ScriptedHandset::new()
        .reset()
        .send(&hex!("A0F2000016"))
        .fail("device unplugged");
    let (mut relay, _sink) = relay(handset, stub_card(), InterceptPipeline::default());

    relay.poll_once().unwrap();
    assert_eq!(relay.handset().received(), hex!("3B00 6D00"));
    assert_eq!(
        relay.poll_once(),
        Err(Error::TransportFailure("device unplugged".into()))
    );
}
