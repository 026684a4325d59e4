//! Integration tests for network expansion sessions.
//!
//! Sources are scripted in memory so every scenario is deterministic and
//! needs no network.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use papernet_core::corpus::{AuthorKey, PaperKey, author_key, network_analysis};
use papernet_core::engine::{
    AuthorCollectionRequest, CorpusDelta, CorpusSink, ExpansionLimits, FailureKind,
    KeywordCollectionRequest, SessionError, SessionKind, SessionState, TerminationReason,
};
use papernet_core::source::{RawPaper, SourceId};
use papernet_core::{Database, SqliteCorpusStore, StoreError};
use tokio_util::sync::CancellationToken;

mod support;
use support::scripted::{ScriptedFailure, ScriptedSource, arxiv_paper, engine_with};

fn key(name: &str) -> AuthorKey {
    author_key(name).unwrap()
}

fn limits(max_generations: u32) -> ExpansionLimits {
    ExpansionLimits {
        max_generations,
        ..ExpansionLimits::default()
    }
}

#[tokio::test]
async fn test_resighting_in_later_generation_increments_edge() {
    let source = Arc::new(
        ScriptedSource::new(SourceId::Arxiv)
            .with(
                "Alice Smith",
                vec![arxiv_paper(
                    SourceId::Arxiv,
                    "2101.00001",
                    "Graphs of Science",
                    &["Alice Smith", "Bob Lee"],
                )],
            )
            .with(
                "Bob Lee",
                vec![arxiv_paper(
                    SourceId::Arxiv,
                    "2101.00001v2",
                    "Graphs of Science",
                    &["Bob Lee", "Alice Smith"],
                )],
            ),
    );
    let engine = engine_with(vec![source.clone()]);

    let session = engine
        .collect_by_authors(AuthorCollectionRequest::new(["Alice Smith"], true).with_limits(limits(2)))
        .await
        .unwrap();

    assert_eq!(session.generations.len(), 2);
    assert_eq!(session.generations[0].queried, vec!["Alice Smith"]);
    assert_eq!(session.generations[0].next_frontier, vec!["Bob Lee"]);
    assert_eq!(session.generations[1].queried, vec!["Bob Lee"]);
    assert_eq!(session.papers_found(), 1);
    assert_eq!(session.papers_created.len(), 1);
    assert!(session.is_done());
    assert_eq!(session.termination, Some(TerminationReason::FrontierEmpty));

    let edge_count = engine
        .corpus()
        .read(|corpus| {
            assert_eq!(corpus.paper_count(), 1);
            corpus
                .graph()
                .collaboration(&key("Alice Smith"), &key("Bob Lee"))
                .map(|edge| edge.count)
        })
        .unwrap();
    assert_eq!(edge_count, Some(2));
}

#[tokio::test]
async fn test_failed_author_does_not_stop_generation() {
    let source = Arc::new(
        ScriptedSource::new(SourceId::PubMed)
            .failing("Alice Smith", ScriptedFailure::Outage)
            .with(
                "Carol King",
                vec![arxiv_paper(SourceId::PubMed, "2201.1", "Cells", &["Carol King", "Dan Ng"])],
            ),
    );
    let engine = engine_with(vec![source]);

    let session = engine
        .collect_by_authors(AuthorCollectionRequest::new(["Alice Smith", "Carol King"], false))
        .await
        .unwrap();

    assert_eq!(session.generations[0].queried, vec!["Alice Smith", "Carol King"]);
    assert_eq!(session.papers_found(), 1);
    assert_eq!(session.failures.len(), 1);
    assert_eq!(session.failures[0].query, "Alice Smith");
    assert_eq!(session.failures[0].source, SourceId::PubMed);
    assert_eq!(session.failures[0].kind, FailureKind::TransientExhausted);
    assert_eq!(session.termination, Some(TerminationReason::FrontierEmpty));
}

#[tokio::test]
async fn test_fully_failed_generation_still_finishes() {
    let source = Arc::new(
        ScriptedSource::new(SourceId::SemanticScholar)
            .failing("Nobody Known", ScriptedFailure::Unknown)
            .failing("Also Unknown", ScriptedFailure::Unknown),
    );
    let engine = engine_with(vec![source]);

    let session = engine
        .collect_by_authors(AuthorCollectionRequest::new(["Nobody Known", "Also Unknown"], true))
        .await
        .unwrap();

    assert!(session.is_done());
    assert_eq!(session.papers_found(), 0);
    assert_eq!(session.failures.len(), 2);
    assert!(session.failures.iter().all(|f| f.kind == FailureKind::PermanentQuery));
    assert_eq!(session.termination, Some(TerminationReason::FrontierEmpty));
}

#[tokio::test]
async fn test_frontier_is_ordered_by_collaboration_count() {
    let source = Arc::new(
        ScriptedSource::new(SourceId::Arxiv).with(
            "Seed Author",
            vec![
                arxiv_paper(SourceId::Arxiv, "1.1", "First", &["Seed Author", "Zed Early"]),
                arxiv_paper(SourceId::Arxiv, "1.2", "Second", &["Seed Author", "Amy Late"]),
                arxiv_paper(SourceId::Arxiv, "1.3", "Third", &["Seed Author", "Amy Late"]),
            ],
        ),
    );
    let engine = engine_with(vec![source]);

    let session = engine
        .collect_by_authors(AuthorCollectionRequest::new(["Seed Author"], true).with_limits(limits(1)))
        .await
        .unwrap();

    assert_eq!(session.generations[0].next_frontier, vec!["Amy Late", "Zed Early"]);
    assert_eq!(session.termination, Some(TerminationReason::GenerationLimit));
}

#[tokio::test]
async fn test_frontier_truncated_and_no_author_revisited() {
    let source = Arc::new(
        ScriptedSource::new(SourceId::Arxiv)
            .with(
                "Hub Person",
                vec![arxiv_paper(
                    SourceId::Arxiv,
                    "3.1",
                    "Big Collaboration",
                    &["Hub Person", "Ann One", "Ben Two", "Cat Three"],
                )],
            )
            .with(
                "Ann One",
                vec![arxiv_paper(SourceId::Arxiv, "3.2", "Follow Up", &["Ann One", "Hub Person"])],
            )
            .with(
                "Ben Two",
                vec![arxiv_paper(SourceId::Arxiv, "3.3", "Side Note", &["Ben Two", "Ann One"])],
            ),
    );
    let engine = engine_with(vec![source.clone()]);
    let request = AuthorCollectionRequest::new(["Hub Person"], true).with_limits(ExpansionLimits {
        max_generations: 5,
        max_new_authors_per_generation: 2,
        ..ExpansionLimits::default()
    });

    let session = engine.collect_by_authors(request).await.unwrap();

    assert_eq!(session.generations[0].next_frontier.len(), 2);
    let mut seen = HashSet::new();
    for generation in &session.generations {
        for name in &generation.queried {
            assert!(seen.insert(name.clone()), "{name} queried twice");
        }
    }
    let calls = source.calls();
    assert_eq!(calls.iter().filter(|c| *c == "Hub Person").count(), 1);
    assert_eq!(calls.iter().filter(|c| *c == "Ann One").count(), 1);
}

#[tokio::test]
async fn test_paper_budget_terminates_unbounded_sources() {
    let papers: Vec<RawPaper> = (0..500)
        .map(|i| {
            arxiv_paper(
                SourceId::Arxiv,
                &format!("9.{i}"),
                &format!("Paper number {i}"),
                &["Prolific Writer", &format!("Coauthor {i}")],
            )
        })
        .collect();
    let source = Arc::new(
        ScriptedSource::new(SourceId::Arxiv)
            .with("Prolific Writer", papers)
            .with_page_size(25),
    );
    let engine = engine_with(vec![source]);
    let request = AuthorCollectionRequest::new(["Prolific Writer"], true).with_limits(ExpansionLimits {
        max_papers_per_author: 1_000,
        max_total_papers: 40,
        ..ExpansionLimits::default()
    });

    let session = engine.collect_by_authors(request).await.unwrap();

    assert_eq!(session.papers_found(), 40);
    assert_eq!(session.termination, Some(TerminationReason::PaperBudget));
    assert_eq!(session.generations.len(), 1);
    assert!(session.generations[0].next_frontier.is_empty());
}

#[tokio::test]
async fn test_author_budget_stops_expansion() {
    let source = Arc::new(ScriptedSource::new(SourceId::Arxiv).with(
        "Root Author",
        vec![arxiv_paper(SourceId::Arxiv, "4.1", "Team", &["Root Author", "Kim A", "Lee B"])],
    ));
    let engine = engine_with(vec![source]);
    let request = AuthorCollectionRequest::new(["Root Author"], true).with_limits(ExpansionLimits {
        max_authors: 2,
        ..ExpansionLimits::default()
    });

    let session = engine.collect_by_authors(request).await.unwrap();

    assert_eq!(session.authors_queried, 2);
    assert_eq!(session.termination, Some(TerminationReason::AuthorBudget));
}

#[tokio::test]
async fn test_cancellation_preserves_committed_work() {
    let token = CancellationToken::new();
    let source = Arc::new(
        ScriptedSource::new(SourceId::Arxiv)
            .with(
                "First Seed",
                vec![arxiv_paper(SourceId::Arxiv, "5.1", "Kept", &["First Seed", "Co Author"])],
            )
            .with(
                "Second Seed",
                vec![arxiv_paper(SourceId::Arxiv, "5.2", "Never", &["Second Seed"])],
            )
            .cancel_when("First Seed", token.clone()),
    );
    let engine = engine_with(vec![source.clone()]).with_cancellation(token);

    let session = engine
        .collect_by_authors(AuthorCollectionRequest::new(["First Seed", "Second Seed"], true))
        .await
        .unwrap();

    assert_eq!(session.state, SessionState::Done);
    assert_eq!(session.termination, Some(TerminationReason::Cancelled));
    assert_eq!(session.papers_found(), 1);
    assert!(!source.calls().contains(&"Second Seed".to_string()));
}

#[tokio::test]
async fn test_keyword_collection_respects_max_and_skips_frontier() {
    let papers: Vec<RawPaper> = (0..30)
        .map(|i| {
            arxiv_paper(
                SourceId::Arxiv,
                &format!("6.{i}"),
                &format!("Synthetic biology study {i}"),
                &["Lab Member", &format!("Student {i}")],
            )
        })
        .collect();
    let arxiv = Arc::new(ScriptedSource::new(SourceId::Arxiv).with("synthetic biology", papers));
    let pubmed = Arc::new(ScriptedSource::new(SourceId::PubMed).without_keywords());
    let engine = engine_with(vec![arxiv, pubmed.clone()]);

    let session = engine
        .collect_by_keywords(KeywordCollectionRequest::new(["synthetic biology"], 10))
        .await
        .unwrap();

    assert_eq!(session.kind, SessionKind::Keywords);
    assert!(session.papers_found() <= 10);
    assert_eq!(session.authors_queried, 0);
    assert_eq!(session.generations.len(), 1);
    assert!(session.generations[0].queried.is_empty());
    assert!(session.generations[0].next_frontier.is_empty());
    assert_eq!(session.termination, Some(TerminationReason::PaperBudget));
    assert!(pubmed.calls().is_empty());

    let edges = engine.corpus().read(|corpus| corpus.graph().edge_count()).unwrap();
    assert!(edges > 0, "keyword papers still update the graph");
}

#[tokio::test]
async fn test_higher_authority_citation_count_wins_across_sources() {
    let mut from_pubmed = RawPaper::new(
        SourceId::PubMed,
        "Shared Discovery",
        vec!["Ada Byron".to_string(), "Max Born".to_string()],
    );
    from_pubmed.doi = Some("10.1000/shared".to_string());
    from_pubmed.citation_count = Some(50);

    let mut from_s2 = RawPaper::new(
        SourceId::SemanticScholar,
        "Shared discovery.",
        vec!["Ada Byron".to_string(), "Max Born".to_string()],
    );
    from_s2.doi = Some("https://doi.org/10.1000/SHARED".to_string());
    from_s2.citation_count = Some(120);

    let pubmed = Arc::new(ScriptedSource::new(SourceId::PubMed).with("Ada Byron", vec![from_pubmed]));
    let s2 = Arc::new(ScriptedSource::new(SourceId::SemanticScholar).with("Ada Byron", vec![from_s2]));
    let engine = engine_with(vec![pubmed, s2]);

    let session = engine
        .collect_by_authors(AuthorCollectionRequest::new(["Ada Byron"], false))
        .await
        .unwrap();

    assert_eq!(session.papers_found(), 1);
    let citation = engine
        .corpus()
        .read(|corpus| {
            let paper = corpus.papers().next().unwrap();
            (paper.citation_count, paper.citation_source, paper.sources.len())
        })
        .unwrap();
    assert_eq!(citation, (Some(120), Some(SourceId::SemanticScholar), 2));
    assert_eq!(session.generations[0].edge_updates, 1);
}

#[tokio::test]
async fn test_identical_inputs_explore_identically() {
    let build = || {
        Arc::new(
            ScriptedSource::new(SourceId::Arxiv)
                .with(
                    "Start Here",
                    vec![
                        arxiv_paper(SourceId::Arxiv, "7.1", "A", &["Start Here", "Pat Q", "Rob S"]),
                        arxiv_paper(SourceId::Arxiv, "7.2", "B", &["Start Here", "Rob S"]),
                    ],
                )
                .with(
                    "Rob S",
                    vec![arxiv_paper(SourceId::Arxiv, "7.3", "C", &["Rob S", "Tia U"])],
                ),
        )
    };

    let first = engine_with(vec![build()])
        .collect_by_authors(AuthorCollectionRequest::new(["Start Here"], true))
        .await
        .unwrap();
    let second = engine_with(vec![build()])
        .collect_by_authors(AuthorCollectionRequest::new(["Start Here"], true))
        .await
        .unwrap();

    assert_eq!(first.generations, second.generations);
    assert_eq!(first.generations[1].queried, vec!["Rob S", "Pat Q"]);
}

#[tokio::test]
async fn test_setup_errors_are_fatal() {
    let engine = engine_with(vec![Arc::new(ScriptedSource::new(SourceId::Arxiv))]);

    let empty = engine
        .collect_by_authors(AuthorCollectionRequest::new(["   "], true))
        .await;
    assert!(matches!(empty, Err(SessionError::Config { .. })));

    let no_keywords = engine
        .collect_by_keywords(KeywordCollectionRequest::new(Vec::<String>::new(), 10))
        .await;
    assert!(matches!(no_keywords, Err(SessionError::Config { .. })));

    let author_only = engine_with(vec![Arc::new(
        ScriptedSource::new(SourceId::PubMed).without_keywords(),
    )]);
    let result = author_only
        .collect_by_keywords(KeywordCollectionRequest::new(["crispr"], 10))
        .await;
    assert!(matches!(result, Err(SessionError::Config { .. })));
}

#[tokio::test]
async fn test_generations_persist_through_sqlite_sink() {
    let source = Arc::new(
        ScriptedSource::new(SourceId::Arxiv)
            .with(
                "Alice Smith",
                vec![arxiv_paper(SourceId::Arxiv, "8.1", "Stored", &["Alice Smith", "Bob Lee"])],
            )
            .with(
                "Bob Lee",
                vec![arxiv_paper(SourceId::Arxiv, "8.1", "Stored", &["Bob Lee", "Alice Smith"])],
            ),
    );
    let store = SqliteCorpusStore::new(Database::new_in_memory().await.unwrap());
    let engine = engine_with(vec![source]).with_sink(Arc::new(store.clone()));

    engine
        .collect_by_authors(AuthorCollectionRequest::new(["Alice Smith"], true))
        .await
        .unwrap();

    assert_eq!(store.paper_count().await.unwrap(), 1);
    let edge = store
        .collaboration(&key("Alice Smith"), &key("Bob Lee"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(edge.count, 2);
    assert_eq!(
        store.paper_authors(&PaperKey::from_stored("arxiv:8.1")).await.unwrap(),
        vec!["alice smith".to_string(), "bob lee".to_string()]
    );
}

struct BrokenSink;

#[async_trait]
impl CorpusSink for BrokenSink {
    async fn persist(&self, _delta: &CorpusDelta) -> Result<(), StoreError> {
        Err(StoreError::from(sqlx::Error::PoolClosed))
    }
}

#[tokio::test]
async fn test_storage_failure_is_fatal_and_carries_partial_session() {
    let source = Arc::new(ScriptedSource::new(SourceId::Arxiv).with(
        "Alice Smith",
        vec![arxiv_paper(SourceId::Arxiv, "9.9", "Lost?", &["Alice Smith", "Bob Lee"])],
    ));
    let engine = engine_with(vec![source]).with_sink(Arc::new(BrokenSink));

    let error = engine
        .collect_by_authors(AuthorCollectionRequest::new(["Alice Smith"], true))
        .await
        .unwrap_err();

    let partial = error.partial_session().unwrap();
    assert_eq!(partial.papers_found(), 1);
    assert_eq!(partial.generations.len(), 1);
    assert!(error.to_string().contains("generation 1"));

    let analysis = engine.corpus().read(network_analysis).unwrap();
    assert_eq!(analysis.total_papers, 1);
}
