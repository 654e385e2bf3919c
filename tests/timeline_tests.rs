//! Timeline reconstruction over full event sequences

use prism::protocol::{AgentKind, AgentStart, Event, EventCodec, FinalReport, Summary};
use prism::timeline::{reduce, StepDetails, TimelineState};

fn agent_start(task_id: i64, agent: AgentKind, prompt: &str) -> Event {
    Event::AgentStart(AgentStart {
        task_id,
        agent,
        prompt: prompt.to_string(),
    })
}

fn summary(url: &str) -> Event {
    Event::SummaryComplete(Summary {
        url: url.to_string(),
        title: format!("Title of {}", url),
        summary: format!("Summary of {}", url),
        relevance_score: 0.8,
    })
}

fn fold(events: &[Event]) -> TimelineState {
    events.iter().fold(TimelineState::new(), reduce)
}

fn research_scenario() -> Vec<Event> {
    vec![
        agent_start(1, AgentKind::ResearcherAgent, "Find sources"),
        Event::QueriesGenerated {
            queries: vec!["q1".into(), "q2".into()],
        },
        Event::UrlsFound {
            urls: vec!["u1".into(), "u2".into()],
        },
        summary("u1"),
        summary("u2"),
        agent_start(2, AgentKind::CodeExecutor, "Compute"),
        Event::CodeExecuting {
            code: "print(1)".into(),
        },
        Event::Complete(FinalReport {
            report: "R".into(),
            image_urls: vec![],
        }),
    ]
}

#[test]
fn test_research_scenario_produces_two_steps() {
    let mut state = fold(&research_scenario());

    assert_eq!(state.completed.len(), 1);
    assert!(state.in_flight.is_some());

    // Terminal event: the run controller finalizes the trailing step.
    state.finalize();
    let history = state.completed;

    assert_eq!(history.len(), 2);
    assert_eq!(history[0].agent, AgentKind::ResearcherAgent);
    assert_eq!(history[0].output.summaries.as_ref().unwrap().len(), 2);
    assert_eq!(history[0].output.code, None);

    assert_eq!(history[1].agent, AgentKind::CodeExecutor);
    assert_eq!(history[1].output.code.as_deref(), Some("print(1)"));
    assert_eq!(history[1].unique_id, "step-2-task-2");
}

#[test]
fn test_summaries_accumulate_in_every_order() {
    let urls = ["a", "b", "c"];
    let orders = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];

    for order in orders {
        let mut events = vec![agent_start(1, AgentKind::ResearcherAgent, "p")];
        events.extend(order.iter().map(|&i| summary(urls[i])));
        let state = fold(&events);

        let summaries = state.in_flight.unwrap().details.summaries.unwrap();
        assert_eq!(summaries.len(), 3);
        for (got, &i) in summaries.iter().zip(order.iter()) {
            assert_eq!(Event::SummaryComplete(got.clone()), summary(urls[i]));
        }
    }
}

#[test]
fn test_agent_start_closes_exactly_one_step() {
    let state = fold(&[
        agent_start(1, AgentKind::ResearcherAgent, "first"),
        Event::QueriesGenerated {
            queries: vec!["q".into()],
        },
        summary("u"),
        Event::CodeExecuting { code: "x = 1".into() },
    ]);
    let before = state.completed.len();

    let state = reduce(state, &agent_start(2, AgentKind::LeadSynthesizer, "second"));
    assert_eq!(state.completed.len(), before + 1);

    let in_flight = state.in_flight.unwrap();
    assert_eq!(in_flight.prompt, "second");
    assert_eq!(in_flight.details, StepDetails::default());
}

#[test]
fn test_detail_without_step_is_ignored() {
    let state = fold(&[
        Event::UrlsFound {
            urls: vec!["u".into()],
        },
        summary("u"),
        Event::Log {
            message: "planning".into(),
        },
    ]);
    assert_eq!(state, TimelineState::new());

    let mut state = TimelineState::new();
    assert!(state.apply(&Event::CodeExecuting { code: "1".into() }).is_err());
}

#[test]
fn test_second_urls_found_replaces_url_set() {
    let state = fold(&[
        agent_start(1, AgentKind::ResearcherAgent, "p"),
        Event::QueriesGenerated {
            queries: vec!["q".into()],
        },
        Event::UrlsFound {
            urls: vec!["u1".into()],
        },
        summary("u1"),
        Event::UrlsFound {
            urls: vec!["u2".into()],
        },
    ]);

    let details = state.in_flight.unwrap().details;
    assert_eq!(details.urls, Some(vec!["u2".to_string()]));
    assert_eq!(details.summaries, Some(vec![]));
    assert_eq!(details.queries, Some(vec!["q".to_string()]));
}

#[test]
fn test_unknown_agent_is_kept() {
    let state = fold(&[agent_start(7, AgentKind::Other("FactChecker".into()), "check")]);
    assert_eq!(state.activity_label(), "Processing...");

    let step = state.in_flight.unwrap();
    assert_eq!(step.agent.as_str(), "FactChecker");
}

#[test]
fn test_decoded_stream_is_deterministic() {
    let body: String = research_scenario()
        .iter()
        .map(|e| format!("data: {}\n\n", e.to_json().unwrap()))
        .collect();

    let run = |chunk_size: usize| {
        let mut codec = EventCodec::new();
        let events: Vec<Event> = body
            .as_bytes()
            .chunks(chunk_size)
            .flat_map(|chunk| codec.feed(chunk))
            .collect();
        fold(&events)
    };

    let whole = run(body.len());
    assert_eq!(run(1), whole);
    assert_eq!(run(7), whole);
    assert_eq!(whole.completed.len(), 1);
}
