use async_trait::async_trait;
use factorlab_core::config::ExploreConfig;
use factorlab_core::{Error, ExecutionResult, FactorValue, FailureKind, Fixture, Result, Variant};
use factorlab_executor::CodeExecutor;
use factorlab_explore::{
    CodeGenerationRequest, ExplorationService, InlineComments, LLMProvider,
};
use factorlab_storage::{ExplorationStore, VersionMeta, VersionMetaUpdate, VersionStore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Routes by prompt kind: exploration prompts get `batch`, everything else
/// goes through `fixer`.
struct ScriptedLLM {
    batch: String,
    fixer: Box<dyn Fn(&str) -> String + Send + Sync>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLLM {
    fn new(batch: String, fixer: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        Self {
            batch,
            fixer: Box::new(fixer),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl LLMProvider for ScriptedLLM {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        if prompt.contains("\"variants\"") {
            Ok(self.batch.clone())
        } else {
            Ok((self.fixer)(prompt))
        }
    }
}

/// Snippets containing `raise` fail; others yield factor `v = 1.0`.
struct FakeExecutor {
    runs: AtomicUsize,
}

#[async_trait]
impl CodeExecutor for FakeExecutor {
    async fn execute(&self, code: &str, fixture: &Fixture) -> Result<ExecutionResult> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if code.contains("raise") {
            return Ok(ExecutionResult::failed(
                fixture,
                FailureKind::Runtime,
                "ValueError: broken",
                Some("ValueError".to_string()),
                Some("Traceback (most recent call last):\n  File \"<factor>\", line 2".to_string()),
            ));
        }
        let mut factors = indexmap::IndexMap::new();
        factors.insert("v".to_string(), FactorValue::Scalar { value: Some(1.0) });
        Ok(ExecutionResult::succeeded(fixture, factors, Default::default()))
    }
}

fn batch(codes: &[&str]) -> String {
    let variants: Vec<serde_json::Value> = codes
        .iter()
        .enumerate()
        .map(|(i, code)| {
            serde_json::json!({
                "name": format!("方案{}", i + 1),
                "description": format!("desc {}", i + 1),
                "pseudocode": format!("【因子计算阶段】\n{}. step\n", i + 1),
                "code": code,
            })
        })
        .collect();
    serde_json::json!({ "variants": variants }).to_string()
}

struct Harness {
    service: ExplorationService,
    llm: Arc<ScriptedLLM>,
    exec: Arc<FakeExecutor>,
    comments: Arc<InlineComments>,
    _dir: TempDir,
}

fn harness(llm: ScriptedLLM) -> Harness {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("explore.db");
    let llm = Arc::new(llm);
    let exec = Arc::new(FakeExecutor { runs: AtomicUsize::new(0) });
    let comments = Arc::new(InlineComments::new());
    let service = ExplorationService::new(
        ExploreConfig::default(),
        llm.clone(),
        exec.clone(),
        comments.clone(),
        Arc::new(ExplorationStore::open(&db).unwrap()),
        Arc::new(VersionStore::open(&db).unwrap()),
    )
    .unwrap();
    Harness { service, llm, exec, comments, _dir: dir }
}

fn clean_batch() -> String {
    batch(&["a = 1", "b = 2", "c = 3"])
}

#[tokio::test]
async fn test_empty_comment_rejected_before_any_call() {
    let h = harness(ScriptedLLM::new(clean_batch(), |_| String::new()));
    h.comments.insert("c1", "   \n").await;

    let err = h.service.generate("c1", None).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    let err = h.service.regenerate("c1", Some("  ")).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    assert_eq!(h.llm.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.exec.runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_comment_not_found() {
    let h = harness(ScriptedLLM::new(clean_batch(), |_| String::new()));
    let err = h.service.generate("nope", Some("text")).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_broken_variant_absent_from_batch() {
    let broken = "def calculate_factor(code, date):\n    raise ValueError('x')";
    let h = harness(ScriptedLLM::new(
        batch(&["a = 1", broken, "c = 3"]),
        move |_| broken.to_string(),
    ));
    h.comments.insert("c1", "订单流不平衡因子").await;

    let view = h.service.generate("c1", None).await.unwrap();
    assert!(view.is_generated);
    assert!(view.variants.len() <= 2);
    assert!(view.variants.iter().all(|v| v.name != "方案2"));
    assert!(view.variants.iter().all(|v| !v.code.contains("raise")));
}

#[tokio::test]
async fn test_regenerate_clears_overlay_and_results() {
    let h = harness(ScriptedLLM::new(clean_batch(), |_| String::new()));
    h.comments.insert("c1", "因子").await;
    h.service.generate("c1", None).await.unwrap();

    let mut edited = h.service.get("c1").unwrap().variants;
    edited[0].code = "a = 100".to_string();
    h.service.save_variants("c1", &edited).unwrap();
    h.service.execute_variant("c1", 0, None, None).await.unwrap();

    let view = h.service.get("c1").unwrap();
    assert!(view.is_modified);
    assert_eq!(view.variants[0].code, "a = 100");
    assert_eq!(view.original_variants[0].code, "a = 1");
    assert_eq!(view.last_executed_variant, Some(0));
    assert!(view.execution_results[&0].success);

    let view = h.service.regenerate("c1", None).await.unwrap();
    assert!(!view.is_modified);
    assert!(view.execution_results.is_empty());
    assert!(h.llm.prompts.lock().unwrap().iter().any(|p| p.contains("重新生成请求")));
}

#[tokio::test]
async fn test_save_variants_count_must_match() {
    let h = harness(ScriptedLLM::new(clean_batch(), |_| String::new()));
    h.comments.insert("c1", "因子").await;
    h.service.generate("c1", None).await.unwrap();

    let err = h.service.save_variants("c1", &[Variant::default()]).unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert!(matches!(h.service.save_variants("other", &[]), Err(Error::NotFound(_))));
}

#[tokio::test]
async fn test_execute_variant_uses_override_fixture() {
    let h = harness(ScriptedLLM::new(clean_batch(), |_| String::new()));
    h.comments.insert("c1", "因子").await;
    h.service.generate("c1", None).await.unwrap();

    let fixture = Fixture::new("600000", 20230103);
    let res = h
        .service
        .execute_variant("c1", 1, Some(fixture.clone()), Some("raise KeyError"))
        .await
        .unwrap();
    assert!(!res.success);

    let view = h.service.get("c1").unwrap();
    assert_eq!(view.fixture, fixture);
    assert!(!view.execution_results[&1].success);
    assert!(matches!(
        h.service.execute_variant("c1", 7, None, None).await,
        Err(Error::Validation(_))
    ));
}

#[tokio::test]
async fn test_restore_appends_new_version() {
    let h = harness(ScriptedLLM::new(clean_batch(), |_| String::new()));
    h.comments.insert("c1", "因子").await;
    h.service.generate("c1", None).await.unwrap();

    let meta = VersionMeta {
        created_by: Some("alice".to_string()),
        ..Default::default()
    };
    let (v1, _) = h.service.create_version("c1", 0, None, &meta).unwrap();

    let mut edited = h.service.get("c1").unwrap().variants;
    edited[0].code = "a = 2".to_string();
    edited[0].pseudocode = "changed\n".to_string();
    h.service.save_variants("c1", &edited).unwrap();
    h.service.create_version("c1", 0, None, &meta).unwrap();

    let before = h.service.list_versions("c1", 0).unwrap().len();
    let restored = h.service.restore_version(v1.id, Some("bob".to_string())).unwrap();
    let after = h.service.list_versions("c1", 0).unwrap();

    assert!(after.len() > before);
    let newest = &after[0].version;
    assert_eq!(newest.id, restored.new_version.id);
    assert_eq!(newest.snapshot, v1.snapshot);
    assert_eq!(newest.note.as_deref(), Some(format!("从版本 #{} 恢复", v1.id).as_str()));
    assert_eq!(h.service.get_version(v1.id).unwrap().snapshot, v1.snapshot);

    let live = &h.service.get("c1").unwrap().variants[0];
    assert_eq!(live.code, "a = 1");
    assert_eq!(live.name, "方案1");
    assert!(!after[0].created_at_local.is_empty());
}

#[tokio::test]
async fn test_restore_oldest_at_capacity_keeps_it() {
    let h = harness(ScriptedLLM::new(clean_batch(), |_| String::new()));
    h.comments.insert("c1", "因子").await;
    h.service.generate("c1", None).await.unwrap();

    let keep = ExploreConfig::default().version_keep;
    let meta = VersionMeta::default();
    let mut edited = h.service.get("c1").unwrap().variants;
    for i in 0..keep {
        edited[0].code = format!("a = {}", i);
        h.service.save_variants("c1", &edited).unwrap();
        h.service.create_version("c1", 0, None, &meta).unwrap();
    }
    let before = h.service.list_versions("c1", 0).unwrap();
    assert_eq!(before.len(), keep);
    let oldest = before.last().unwrap().version.clone();

    let restored = h.service.restore_version(oldest.id, None).unwrap();
    let after = h.service.list_versions("c1", 0).unwrap();

    assert_eq!(after.len(), keep + 1);
    assert_eq!(after[0].version.id, restored.new_version.id);
    assert_eq!(restored.new_version.snapshot, oldest.snapshot);
    assert_eq!(h.service.get_version(oldest.id).unwrap().snapshot, oldest.snapshot);
    assert_eq!(h.service.get("c1").unwrap().variants[0].code, "a = 0");
}

#[tokio::test]
async fn test_version_meta_diff_and_delete() {
    let h = harness(ScriptedLLM::new(clean_batch(), |_| String::new()));
    h.comments.insert("c1", "因子").await;
    h.service.generate("c1", None).await.unwrap();

    let meta = VersionMeta::default();
    let (a, _) = h.service.create_version("c1", 0, None, &meta).unwrap();
    let (b, _) = h.service.create_version("c1", 1, None, &meta).unwrap();

    let d = h.service.diff_versions(a.id, b.id).unwrap();
    assert!(d.code_diff.iter().any(|s| s.added));
    assert!(d.code_diff.iter().any(|s| s.removed));
    let same = h.service.diff_versions(a.id, a.id).unwrap();
    assert_eq!(same.code_diff.len(), 1);

    let updated = h
        .service
        .update_version_meta(a.id, &VersionMetaUpdate {
            is_important: Some(true),
            ..Default::default()
        })
        .unwrap();
    assert!(updated.is_important);
    assert_eq!(updated.snapshot, a.snapshot);

    h.service.delete_version(b.id).unwrap();
    assert!(matches!(h.service.get_version(b.id), Err(Error::NotFound(_))));
    assert_eq!(h.service.cleanup_versions("c1", 0, Some(0)).unwrap(), 0);
}

#[tokio::test]
async fn test_generate_code_updates_overlay_with_diff_prompt() {
    let h = harness(ScriptedLLM::new(clean_batch(), |prompt| {
        if prompt.contains("增量修改") {
            "```python\nnew_code = 1\n```".to_string()
        } else {
            "raise RuntimeError".to_string()
        }
    }));
    h.comments.insert("c1", "因子").await;
    h.service.generate("c1", None).await.unwrap();

    let out = h
        .service
        .generate_code(&CodeGenerationRequest {
            comment_id: Some("c1".to_string()),
            variant_index: Some(2),
            description: "new desc".to_string(),
            pseudocode: "【因子计算阶段】\n3. other step\n".to_string(),
            current_code: None,
        })
        .await
        .unwrap();
    assert!(out.success);
    assert_eq!(out.code, "new_code = 1");
    assert_eq!(out.attempts, 0);

    let live = &h.service.get("c1").unwrap().variants[2];
    assert_eq!(live.code, "new_code = 1");
    assert_eq!(live.description, "new desc");
}

#[tokio::test]
async fn test_generate_code_failure_is_best_effort() {
    let h = harness(ScriptedLLM::new(clean_batch(), |_| "raise RuntimeError".to_string()));
    let out = h
        .service
        .generate_code(&CodeGenerationRequest {
            description: "d".to_string(),
            pseudocode: "p".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(!out.success);
    assert_eq!(out.code, "raise RuntimeError");
    assert_eq!(out.attempts, 3);
    assert!(out.error.is_some());

    let err = h
        .service
        .generate_code(&CodeGenerationRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}
