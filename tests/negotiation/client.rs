use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use serde_json::json;
use tokio_util::sync::CancellationToken;

use ratelord::{
    DecisionStatus, NegotiationClient, NegotiationError, Outcome,
    negotiation::{
        backoff::{BackoffPolicy, UniformJitter},
        telemetry::{AttemptFailure, NegotiationEvent},
    },
};

use crate::support::{
    CancellingSuspender, RecordingTelemetrySink, ScriptedTransport, Step, approve, client, config,
    intent,
};

#[tokio::test]
async fn given_approving_authority_when_ask_then_one_call_returns_approval() {
    let transport = ScriptedTransport::always(approve("test-intent-id"));
    let (client, suspender) = client(config(3), transport.clone());

    let decision = client.ask(&intent()).await.expect("intent is valid");

    assert!(decision.allowed());
    assert_eq!(decision.status(), DecisionStatus::Approve);
    assert_eq!(decision.intent_id(), "test-intent-id");
    assert_eq!(decision.reason(), None);
    assert_eq!(decision.modifications(), None);
    assert_eq!(transport.calls(), 1);
    assert!(suspender.suspensions().is_empty());
    assert_eq!(transport.urls(), vec!["http://test-api/v1/intent".to_string()]);
    assert_eq!(
        transport.payloads(),
        vec![json!({
            "agent_id": "agent-1",
            "identity_id": "id-1",
            "workload_id": "work-1",
            "scope_id": "scope-1",
        })]
    );
}

#[tokio::test]
async fn given_persistent_500_when_ask_then_retries_are_exhausted_and_denied() {
    let transport = ScriptedTransport::always(Step::Respond(500, json!({})));
    let (client, suspender) = client(config(2), transport.clone());

    let decision = client.ask(&intent()).await.expect("intent is valid");

    assert_eq!(transport.calls(), 3);
    assert!(!decision.allowed());
    assert_eq!(decision.status(), DecisionStatus::DenyWithReason);
    assert_eq!(decision.intent_id(), "");
    assert_eq!(
        decision.reason(),
        Some("upstream_error: 500 Internal Server Error")
    );
    assert_eq!(suspender.suspensions().len(), 2);
}

#[tokio::test]
async fn given_two_500s_then_approval_when_ask_then_third_attempt_wins() {
    let transport = ScriptedTransport::new(vec![
        Step::Respond(500, json!({})),
        Step::Respond(500, json!({})),
        approve("third-time"),
    ]);
    let (client, _) = client(config(2), transport.clone());

    let decision = client.ask(&intent()).await.expect("intent is valid");

    assert_eq!(transport.calls(), 3);
    assert!(decision.allowed());
    assert_eq!(decision.intent_id(), "third-time");
    let payloads = transport.payloads();
    assert!(payloads.iter().all(|payload| payload == &payloads[0]));
}

#[tokio::test]
async fn given_client_error_when_ask_then_no_retry_and_denied() {
    for (status, text) in [
        (400, "Bad Request"),
        (404, "Not Found"),
        (429, "Too Many Requests"),
    ] {
        let transport = ScriptedTransport::always(Step::Respond(status, json!({"error": "no"})));
        let (client, suspender) = client(config(3), transport.clone());

        let decision = client.ask(&intent()).await.expect("intent is valid");

        assert_eq!(transport.calls(), 1, "status {status} must not be retried");
        assert!(suspender.suspensions().is_empty());
        assert!(!decision.allowed());
        assert_eq!(decision.intent_id(), "");
        assert_eq!(
            decision.reason().map(str::to_string),
            Some(format!("upstream_error: {status} {text}"))
        );
    }
}

#[tokio::test]
async fn given_network_failures_when_ask_then_backoff_grows_to_cap_and_unreachable() {
    let transport = ScriptedTransport::always(Step::Fail("connection refused"));
    let mut cfg = config(4);
    cfg.base_delay_ms = 50;
    cfg.max_delay_ms = 150;
    let (client, suspender) = client(cfg, transport.clone());

    let decision = client.ask(&intent()).await.expect("intent is valid");

    assert_eq!(transport.calls(), 5);
    assert_eq!(
        suspender.suspensions(),
        vec![
            Duration::from_millis(50),
            Duration::from_millis(100),
            Duration::from_millis(150),
            Duration::from_millis(150),
        ]
    );
    assert_eq!(
        decision.reason(),
        Some("daemon_unreachable: connection refused")
    );
}

#[tokio::test]
async fn given_random_jitter_when_backing_off_then_delays_stay_within_jitter_band() {
    let transport = ScriptedTransport::always(Step::Fail("dns failure"));
    let cfg = config(3);
    let policy = BackoffPolicy::from_config(&cfg);
    let (client, suspender) = client(cfg, transport.clone());
    let client = client.with_jitter(Arc::new(UniformJitter));

    let decision = client.ask(&intent()).await.expect("intent is valid");

    assert!(decision.reason().unwrap_or_default().contains("daemon_unreachable"));
    let suspensions = suspender.suspensions();
    assert_eq!(suspensions.len(), 3);
    for (attempt, delay) in suspensions.iter().enumerate() {
        let capped = policy.capped(attempt as u32);
        assert!(capped <= policy.max);
        assert!(*delay >= capped, "attempt {attempt}: {delay:?} < {capped:?}");
        assert!(
            *delay <= capped.mul_f64(1.2),
            "attempt {attempt}: {delay:?} exceeds jitter band"
        );
    }
    let caps: Vec<Duration> = (0..3).map(|attempt| policy.capped(attempt)).collect();
    assert!(caps.windows(2).all(|pair| pair[0] <= pair[1]));
}

#[tokio::test]
async fn given_wait_modification_when_ask_then_call_resolves_after_wait() {
    let transport = ScriptedTransport::always(Step::Respond(
        200,
        json!({
            "decision": "approve_with_modifications",
            "intent_id": "delayed-intent",
            "modifications": {"wait_seconds": 0.1}
        }),
    ));
    let client = NegotiationClient::with_transport(config(0), transport.clone());

    let started = Instant::now();
    let decision = client.ask(&intent()).await.expect("intent is valid");
    let elapsed = started.elapsed();

    assert!(decision.allowed());
    assert_eq!(decision.status(), DecisionStatus::ApproveWithModifications);
    assert_eq!(decision.wait_seconds(), Some(0.1));
    assert!(
        elapsed >= Duration::from_millis(100),
        "returned after {elapsed:?}"
    );
}

#[tokio::test]
async fn given_wait_on_plain_approval_when_ask_then_no_wait_happens() {
    let transport = ScriptedTransport::always(Step::Respond(
        200,
        json!({
            "decision": "approve",
            "intent_id": "fast",
            "modifications": {"wait_seconds": 5.0, "identity_switch": "bot-2"}
        }),
    ));
    let (client, suspender) = client(config(0), transport);

    let decision = client.ask(&intent()).await.expect("intent is valid");

    assert!(suspender.suspensions().is_empty());
    assert_eq!(
        decision
            .modifications()
            .and_then(|mods| mods.identity_switch.as_deref()),
        Some("bot-2")
    );
}

#[tokio::test]
async fn given_authority_denial_when_ask_then_denial_is_returned_without_retry() {
    let transport = ScriptedTransport::always(Step::Respond(
        200,
        json!({
            "decision": "deny_with_reason",
            "intent_id": "denied-1",
            "reason": "budget_exhausted"
        }),
    ));
    let (client, _) = client(config(3), transport.clone());

    let decision = client.ask(&intent()).await.expect("intent is valid");

    assert_eq!(transport.calls(), 1);
    assert!(!decision.allowed());
    assert_eq!(decision.intent_id(), "denied-1");
    assert_eq!(decision.reason(), Some("budget_exhausted"));
}

#[tokio::test]
async fn given_identical_sequential_asks_then_decisions_are_independent() {
    let transport = ScriptedTransport::new(vec![approve("first"), approve("second")]);
    let (client, _) = client(config(3), transport.clone());
    let before = client.config().clone();

    let first = client.ask(&intent()).await.expect("intent is valid");
    let second = client.ask(&intent()).await.expect("intent is valid");

    assert_eq!(transport.calls(), 2);
    assert_eq!(first.intent_id(), "first");
    assert_eq!(second.intent_id(), "second");
    assert!(first.allowed() && second.allowed());
    assert_eq!(client.config(), &before);
}

#[tokio::test]
async fn given_missing_required_field_when_ask_then_error_and_no_network() {
    let transport = ScriptedTransport::always(approve("never"));
    let (client, _) = client(config(3), transport.clone());
    let mut bad = intent();
    bad.scope_id = String::new();

    let err = client.ask(&bad).await.expect_err("missing scope must fail");

    assert_eq!(err, NegotiationError::MissingField { field: "scope_id" });
    assert_eq!(transport.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn given_hung_authority_when_ask_then_deadline_counts_as_transport_failure() {
    let transport = ScriptedTransport::always(Step::Hang);
    let (client, _) = client(config(1), transport.clone());

    let decision = client.ask(&intent()).await.expect("intent is valid");

    assert_eq!(transport.calls(), 2);
    assert_eq!(
        decision.reason(),
        Some("daemon_unreachable: request timed out after 1000ms")
    );
}

#[tokio::test]
async fn given_malformed_success_body_when_ask_then_fail_closed_without_retry() {
    let transport = ScriptedTransport::always(Step::RespondRaw(200, "<html>oops</html>"));
    let (client, _) = client(config(3), transport.clone());

    let decision = client.ask(&intent()).await.expect("intent is valid");

    assert_eq!(transport.calls(), 1);
    assert!(!decision.allowed());
    assert!(
        decision
            .reason()
            .unwrap_or_default()
            .starts_with("upstream_error: 200 OK: invalid decision body"),
        "unexpected reason: {:?}",
        decision.reason()
    );
}

#[tokio::test]
async fn given_cancel_during_backoff_when_ask_then_cancelled_denial() {
    let token = CancellationToken::new();
    let transport = ScriptedTransport::always(Step::Respond(503, json!({})));
    let client = NegotiationClient::with_transport(config(5), transport.clone()).with_suspender(
        Arc::new(CancellingSuspender {
            token: token.clone(),
        }),
    );

    let decision = client
        .ask_with_cancel(&intent(), &token)
        .await
        .expect("intent is valid");

    assert_eq!(transport.calls(), 1);
    assert!(!decision.allowed());
    assert_eq!(decision.reason(), Some("cancelled: during backoff"));
}

#[tokio::test]
async fn given_cancelled_token_when_ask_then_no_request_is_sent() {
    let token = CancellationToken::new();
    token.cancel();
    let transport = ScriptedTransport::always(approve("unused"));
    let (client, _) = client(config(3), transport.clone());

    let decision = client
        .ask_with_cancel(&intent(), &token)
        .await
        .expect("intent is valid");

    assert_eq!(transport.calls(), 0);
    assert_eq!(decision.reason(), Some("cancelled: during attempt 0"));
}

#[tokio::test]
async fn given_cancelled_token_and_invalid_intent_then_validation_wins() {
    let token = CancellationToken::new();
    token.cancel();
    let transport = ScriptedTransport::always(approve("unused"));
    let (client, _) = client(config(3), transport);
    let mut bad = intent();
    bad.agent_id = String::new();

    let err = client
        .ask_with_cancel(&bad, &token)
        .await
        .expect_err("invalid intent is reported first");
    assert_eq!(err.field(), "agent_id");
}

#[tokio::test]
async fn given_each_path_when_ask_outcome_then_variant_matches() {
    let transport = ScriptedTransport::new(vec![
        approve("a"),
        Step::Respond(
            200,
            json!({"decision": "approve_with_modifications", "intent_id": "m",
                   "modifications": {"wait_seconds": 0.05}}),
        ),
        Step::Respond(403, json!({})),
    ]);
    let (client, suspender) = client(config(0), transport);

    assert!(matches!(
        client.ask_outcome(&intent()).await,
        Outcome::Approved(_)
    ));
    assert!(matches!(
        client.ask_outcome(&intent()).await,
        Outcome::Modified(_)
    ));
    assert_eq!(suspender.suspensions(), vec![Duration::from_millis(50)]);
    match client.ask_outcome(&intent()).await {
        Outcome::Denied { reason, decision } => {
            assert_eq!(reason, "upstream_error: 403 Forbidden");
            assert!(!decision.allowed());
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    let mut bad = intent();
    bad.identity_id = " ".to_string();
    let outcome = client.ask_outcome(&bad).await;
    assert!(!outcome.is_allowed());
    assert!(matches!(outcome, Outcome::Invalid(reason) if reason.contains("identity_id")));
}

#[tokio::test]
async fn given_retry_then_success_when_observed_then_telemetry_traces_the_state_machine() {
    let transport = ScriptedTransport::new(vec![Step::Fail("reset"), approve("ok")]);
    let sink = Arc::new(RecordingTelemetrySink::default());
    let (client, _) = client(config(2), transport);
    let client = client.with_telemetry(sink.clone());

    client.ask(&intent()).await.expect("intent is valid");

    let events = sink.events();
    assert_eq!(events.len(), 5, "events: {events:?}");
    assert_eq!(events[0], NegotiationEvent::AttemptStarted { attempt: 0 });
    assert!(matches!(
        &events[1],
        NegotiationEvent::AttemptFailed {
            attempt: 0,
            failure: AttemptFailure::Transport { .. },
            will_retry: true,
        }
    ));
    assert_eq!(
        events[2],
        NegotiationEvent::BackoffScheduled {
            attempt: 0,
            delay: Duration::from_millis(50),
        }
    );
    assert_eq!(events[3], NegotiationEvent::AttemptStarted { attempt: 1 });
    assert_eq!(
        events[4],
        NegotiationEvent::Decided {
            intent_id: "ok".to_string(),
            status: DecisionStatus::Approve,
            attempts: 2,
        }
    );
}

#[tokio::test]
async fn given_shared_client_when_asks_run_concurrently_then_each_completes() {
    let transport = ScriptedTransport::always(approve("shared"));
    let (client, _) = client(config(0), transport.clone());
    let intent = intent();

    let (a, b, c) = tokio::join!(client.ask(&intent), client.ask(&intent), client.ask(&intent));

    for decision in [a, b, c] {
        assert!(decision.expect("intent is valid").allowed());
    }
    assert_eq!(transport.calls(), 3);
}

#[tokio::test]
async fn given_oversized_wait_when_ask_then_wait_saturates_instead_of_skipping() {
    let transport = ScriptedTransport::always(Step::Respond(
        200,
        json!({
            "decision": "approve_with_modifications",
            "intent_id": "throttled",
            "modifications": {"wait_seconds": 1e30}
        }),
    ));
    let (client, suspender) = client(config(0), transport);

    let decision = client.ask(&intent()).await.expect("intent is valid");

    assert!(decision.allowed());
    assert_eq!(suspender.suspensions(), vec![Duration::MAX]);
}

#[tokio::test]
async fn given_success_without_intent_id_when_ask_then_fail_closed_without_retry() {
    let transport = ScriptedTransport::always(Step::Respond(200, json!({"decision": "approve"})));
    let (client, _) = client(config(3), transport.clone());

    let decision = client.ask(&intent()).await.expect("intent is valid");

    assert_eq!(transport.calls(), 1);
    assert!(!decision.allowed());
    assert!(
        decision
            .reason()
            .unwrap_or_default()
            .starts_with("upstream_error: 200 OK: invalid decision body"),
        "unexpected reason: {:?}",
        decision.reason()
    );
}

#[tokio::test(start_paused = true)]
async fn given_cancel_while_request_in_flight_when_ask_then_attempt_is_named() {
    let token = CancellationToken::new();
    let transport = ScriptedTransport::new(vec![Step::Fail("connection refused"), Step::Hang]);
    let (client, suspender) = client(config(3), transport.clone());

    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        canceller.cancel();
    });

    let decision = client
        .ask_with_cancel(&intent(), &token)
        .await
        .expect("intent is valid");

    assert_eq!(transport.calls(), 2);
    assert_eq!(suspender.suspensions(), vec![Duration::from_millis(50)]);
    assert!(!decision.allowed());
    assert_eq!(decision.reason(), Some("cancelled: during attempt 1"));
}

#[tokio::test]
async fn given_cancel_during_auto_wait_when_ask_then_approval_is_withdrawn() {
    let token = CancellationToken::new();
    let transport = ScriptedTransport::always(Step::Respond(
        200,
        json!({
            "decision": "approve_with_modifications",
            "intent_id": "slow",
            "modifications": {"wait_seconds": 5.0}
        }),
    ));
    let client = NegotiationClient::with_transport(config(0), transport.clone()).with_suspender(
        Arc::new(CancellingSuspender {
            token: token.clone(),
        }),
    );

    let decision = client
        .ask_with_cancel(&intent(), &token)
        .await
        .expect("intent is valid");

    assert_eq!(transport.calls(), 1);
    assert!(!decision.allowed());
    assert_eq!(decision.intent_id(), "");
    assert_eq!(decision.reason(), Some("cancelled: during wait"));
}
