//! Job-level behaviour of the pipeline over in-memory storage and a
//! scripted model: ordering, caching, resumption, failures, cleanup.

mod common;

use common::{descriptor, report_job, Harness, ScriptedModel};
use pdf2md_worker::{CleanupPolicy, JobError, JobStage};

#[tokio::test]
async fn two_page_document_is_published_in_order() {
    let h = Harness::new(&["Hello", ""], ScriptedModel::new(), CleanupPolicy::Keep);

    let result = h.pipeline.run(&report_job()).await.unwrap();

    assert_eq!(result.destination.bucket, "results");
    assert_eq!(result.destination.key, "report.pdf.md");
    assert_eq!(result.uploaded_keys, vec!["report.pdf.md".to_string()]);
    assert_eq!(h.model.transcription_calls(), 2);
    assert_eq!(h.model.reconciliation_calls(), 2);

    let object = h.storage.object("results", "report.pdf.md").unwrap();
    assert_eq!(object.content_type, "text/markdown");
    assert_eq!(
        std::str::from_utf8(&object.body).unwrap(),
        "# Page 1 (Page 1)\n\nseen 1\n\n# Page 2 (Page 2)\n\nseen 2"
    );
}

#[tokio::test]
async fn parsed_text_reaches_both_prompts() {
    let h = Harness::new(&["Hello", ""], ScriptedModel::new(), CleanupPolicy::Keep);
    h.pipeline.run(&report_job()).await.unwrap();

    let requests = h.model.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 4);
    // Page 1 transcription, page 1 reconciliation, then page 2.
    assert!(!requests[0].images.is_empty());
    assert_eq!(requests[0].model, "vision");
    assert!(requests[0].prompt.contains("Hello"));
    assert!(requests[1].images.is_empty());
    assert_eq!(requests[1].model, "text");
    assert!(requests[1].prompt.contains("seen 1"));
    assert!(requests[1].prompt.contains("Hello"));
    assert!(requests[3].prompt.contains("no text could be extracted"));
}

#[tokio::test]
async fn pages_are_assembled_in_page_order() {
    let pages: Vec<String> = (1..=12).map(|n| format!("text {n}")).collect();
    let refs: Vec<&str> = pages.iter().map(String::as_str).collect();
    let model = ScriptedModel::with_reply(|page, _| format!("p{page}"));
    let h = Harness::new(&refs, model, CleanupPolicy::Keep);

    h.pipeline.run(&report_job()).await.unwrap();

    assert_eq!(h.model.reconciled_pages(), (1..=12).collect::<Vec<_>>());
    let body = h.storage.object("results", "report.pdf.md").unwrap().body;
    let expected = (1..=12).map(|n| format!("p{n}")).collect::<Vec<_>>().join("\n\n");
    assert_eq!(std::str::from_utf8(&body).unwrap(), expected);
}

#[tokio::test]
async fn second_run_makes_no_model_calls_and_is_identical() {
    let h = Harness::new(&["one", "two", "three"], ScriptedModel::new(), CleanupPolicy::Keep);

    h.pipeline.run(&report_job()).await.unwrap();
    let first = h.storage.object("results", "report.pdf.md").unwrap().body;
    let calls = h.model.calls();
    assert_eq!(calls, 6);

    h.pipeline.run(&report_job()).await.unwrap();
    let second = h.storage.object("results", "report.pdf.md").unwrap().body;

    assert_eq!(h.model.calls(), calls);
    assert_eq!(first, second);
}

#[tokio::test]
async fn cached_transcription_skips_the_vision_call() {
    let h = Harness::new(&["alpha"], ScriptedModel::new(), CleanupPolicy::Keep);
    let text_dir = h.job_dir().join("output").join("text");
    std::fs::create_dir_all(&text_dir).unwrap();
    std::fs::write(text_dir.join("report_page_1.transcription.txt"), "from cache").unwrap();

    h.pipeline.run(&report_job()).await.unwrap();

    assert_eq!(h.model.transcription_calls(), 0);
    assert_eq!(h.model.reconciliation_calls(), 1);
    let requests = h.model.requests.lock().unwrap().clone();
    assert!(requests[0].prompt.contains("from cache"));
    assert!(text_dir.join("report_page_1.md").exists());
}

#[tokio::test]
async fn fenced_reply_is_unwrapped_and_heading_annotated() {
    let model = ScriptedModel::with_reply(|_, _| "```markdown\n# Title\n\nBody\n```".to_string());
    let h = Harness::new(&["x"], model, CleanupPolicy::Keep);

    h.pipeline.run(&report_job()).await.unwrap();

    let body = h.storage.object("results", "report.pdf.md").unwrap().body;
    assert_eq!(std::str::from_utf8(&body).unwrap(), "# Title (Page 1)\n\nBody");
}

#[tokio::test]
async fn plain_reply_without_heading_is_left_alone() {
    let model = ScriptedModel::with_reply(|_, _| "Just a paragraph.".to_string());
    let h = Harness::new(&["x"], model, CleanupPolicy::Keep);

    h.pipeline.run(&report_job()).await.unwrap();

    let body = h.storage.object("results", "report.pdf.md").unwrap().body;
    assert_eq!(std::str::from_utf8(&body).unwrap(), "Just a paragraph.");
}

#[tokio::test]
async fn failure_at_page_two_resumes_there() {
    let h = Harness::new(&["a", "b", "c"], ScriptedModel::new(), CleanupPolicy::RemoveOnSuccess);
    h.model.fail_reconcile_on(Some(2));

    let err = h.pipeline.run(&report_job()).await.unwrap_err();
    assert!(matches!(err, JobError::PageReconciliationFailure { page: 2, .. }));
    assert_eq!(err.stage(), JobStage::Reconcile);
    assert_eq!(err.page(), Some(2));
    assert!(h.storage.object("results", "report.pdf.md").is_none());
    // Failed jobs keep their caches under RemoveOnSuccess.
    assert!(h.job_dir().join("output/text/report_page_1.md").exists());
    assert!(h.job_dir().join("output/text/report_page_2.transcription.txt").exists());
    assert!(!h.job_dir().join("output/text/report_page_2.md").exists());

    h.model.fail_reconcile_on(None);
    let before = h.model.requests.lock().unwrap().len();
    h.pipeline.run(&report_job()).await.unwrap();

    let retried: Vec<_> = h.model.requests.lock().unwrap()[before..].to_vec();
    // Page 2 only needs reconciliation; page 3 needs both calls.
    assert_eq!(retried.len(), 3);
    assert!(retried[0].images.is_empty());
    assert_eq!(common::prompt_page(&retried[0]), 2);
    assert_eq!(common::prompt_page(&retried[1]), 3);
    assert!(h.storage.object("results", "report.pdf.md").is_some());
    assert!(!h.job_dir().exists());
}

#[tokio::test]
async fn missing_output_bucket_is_rejected_before_any_work() {
    let h = Harness::new(&["a"], ScriptedModel::new(), CleanupPolicy::Keep);
    let job = descriptor(r#"{"sourceBucket":"inbox","sourceKey":"report.pdf"}"#);

    let err = h.pipeline.run(&job).await.unwrap_err();

    match &err {
        JobError::InvalidJobInput { missing } => assert_eq!(missing, &vec!["outputBucket"]),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.stage(), JobStage::Validate);
    assert!(!err.is_retryable());
    assert_eq!(h.model.calls(), 0);
    assert_eq!(h.storage.calls(), (0, 0));
    assert!(std::fs::read_dir(h.workspace_root.path()).unwrap().next().is_none());
}

#[tokio::test]
async fn failed_download_write_is_reported_at_download() {
    let h = Harness::new(&["a"], ScriptedModel::new(), CleanupPolicy::Keep);
    // A directory where the downloaded file should go makes the write fail.
    std::fs::create_dir_all(h.job_dir().join("input/report.pdf")).unwrap();

    let err = h.pipeline.run(&report_job()).await.unwrap_err();

    assert!(matches!(err, JobError::Workspace { .. }), "got {err:?}");
    assert_eq!(err.stage(), JobStage::Download);
    assert_eq!(err.kind(), "WorkspaceFailure");
    assert_eq!(h.storage.calls(), (1, 0));
    assert_eq!(h.model.calls(), 0);
}

#[tokio::test]
async fn missing_source_object_is_a_download_failure() {
    let h = Harness::new(&["a"], ScriptedModel::new(), CleanupPolicy::Keep);
    let job = descriptor(r#"{"sourceBucket":"inbox","sourceKey":"absent.pdf","outputBucket":"results"}"#);

    let err = h.pipeline.run(&job).await.unwrap_err();

    assert!(matches!(err, JobError::DownloadFailure { .. }));
    assert_eq!(err.stage(), JobStage::Download);
    assert_eq!(h.model.calls(), 0);
}

#[tokio::test]
async fn non_pdf_source_is_an_extraction_failure() {
    let h = Harness::new(&["a"], ScriptedModel::new(), CleanupPolicy::Keep);
    h.storage.insert("inbox", "notes.pdf", &b"hello world"[..], "application/pdf");
    let job = descriptor(r#"{"sourceBucket":"inbox","sourceKey":"notes.pdf","outputBucket":"results"}"#);

    let err = h.pipeline.run(&job).await.unwrap_err();

    assert!(matches!(err, JobError::ExtractionFailure { .. }));
    assert_eq!(err.stage(), JobStage::Extract);
    assert_eq!(h.model.calls(), 0);
}

#[tokio::test]
async fn output_prefix_gets_a_trailing_slash() {
    let h = Harness::new(&["a"], ScriptedModel::new(), CleanupPolicy::Keep);
    let job = descriptor(
        r#"{"s3Bucket":"inbox","s3Key":"report.pdf","outputBucket":"results","outputPrefix":"done"}"#,
    );

    let result = h.pipeline.run(&job).await.unwrap();

    assert_eq!(result.destination.key, "done/report.pdf.md");
    assert!(h.storage.object("results", "done/report.pdf.md").is_some());
}

#[tokio::test]
async fn artifacts_are_published_under_the_prefix() {
    let h = Harness::with_options(&["a", "b"], ScriptedModel::new(), CleanupPolicy::Keep, true);
    let job = descriptor(
        r#"{"sourceBucket":"inbox","sourceKey":"report.pdf","outputBucket":"results","outputPrefix":"run/"}"#,
    );

    let result = h.pipeline.run(&job).await.unwrap();

    assert_eq!(result.uploaded_keys[0], "run/report.pdf.md");
    let keys = h.storage.keys("results");
    for expected in [
        "run/report.md",
        "run/images/report_page_1.png",
        "run/text/report_page_2.md",
        "run/text/report_page_2.transcription.txt",
    ] {
        assert!(keys.contains(&expected.to_string()), "missing {expected} in {keys:?}");
    }
    let image = h.storage.object("results", "run/images/report_page_1.png").unwrap();
    assert_eq!(image.content_type, "image/png");
}

#[tokio::test]
async fn cleanup_policies_control_the_workspace() {
    let h = Harness::new(&["a"], ScriptedModel::new(), CleanupPolicy::RemoveOnSuccess);
    h.pipeline.run(&report_job()).await.unwrap();
    assert!(!h.job_dir().exists());

    let h = Harness::new(&["a"], ScriptedModel::new(), CleanupPolicy::Keep);
    h.pipeline.run(&report_job()).await.unwrap();
    assert!(h.job_dir().join("output/report.md").exists());

    let h = Harness::new(&["a"], ScriptedModel::new(), CleanupPolicy::Always);
    h.model.fail_reconcile_on(Some(1));
    h.pipeline.run(&report_job()).await.unwrap_err();
    assert!(!h.job_dir().exists());
}
