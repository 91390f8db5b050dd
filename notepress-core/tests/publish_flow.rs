use notepress_core::header::{self, NoteDate};
use notepress_core::{
    Config, PublishError, PublishOptions, PublishTracker, Publisher, SkipReason, TagCategoryMap,
    TrackerError, UnpublishOptions,
};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

struct Fixture {
    dir: TempDir,
    config: Config,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("vault/assets")).unwrap();
        fs::create_dir_all(dir.path().join("site")).unwrap();

        let mut config = Config::for_dirs(dir.path().join("vault"), dir.path().join("site"));
        config.paths.assets = vec![PathBuf::from("assets")];
        config.tags.map = dir.path().join("tags.yaml");
        fs::write(&config.tags.map, "go: programming\n").unwrap();

        Self { dir, config }
    }

    fn vault(&self) -> PathBuf {
        self.dir.path().join("vault")
    }

    fn posts(&self) -> PathBuf {
        self.dir.path().join("site/content/post")
    }

    fn note(&self, rel: &str, contents: &str) {
        let path = self.vault().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn asset(&self, rel: &str, bytes: &[u8]) {
        let path = self.vault().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, bytes).unwrap();
    }

    fn publisher(&self) -> Publisher {
        Publisher::open(self.config.clone()).unwrap()
    }
}

fn names(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap()
}

#[test]
fn batch_publishes_skips_and_fails_independently() {
    let fx = Fixture::new();
    fx.asset("assets/pic.png", b"\x89PNG fake");
    fx.note(
        "a.md",
        "---\ntitle: A\ndate: 2024-05-01\ntags: [go]\npublish: true\n---\nIntro\n\n![[pic.png]]\n",
    );
    fx.note("b.md", "---\ntitle: B\npublish: false\n---\nprivate\n");
    fx.note("c.md", "---\ntitle: C\npublish: true\nno closing delimiter\n");

    let mut publisher = fx.publisher();
    let result = publisher
        .process(&names(&["a.md", "b.md", "c.md"]), &PublishOptions::default())
        .unwrap();

    assert_eq!(result.total(), 3);
    assert_eq!(result.emitted.len(), 1);
    assert_eq!(result.skipped.len(), 1);
    assert_eq!(result.skipped[0].source, "b.md");
    assert_eq!(result.skipped[0].reason, SkipReason::NotPublishFlagged);
    assert_eq!(result.failed.len(), 1);
    assert_eq!(result.failed[0].source, "c.md");
    assert_eq!(result.failed[0].error.kind(), "MalformedHeader");

    let target = fx.posts().join("a/index.md");
    let (emitted, body) = header::parse(&read(&target)).unwrap();
    assert_eq!(emitted.title, "A");
    assert_eq!(emitted.categories, vec!["programming"]);
    assert_eq!(emitted.date.as_ref().map(|d| d.to_string()).as_deref(), Some("2024-05-01"));
    assert_eq!(emitted.extra_str("image"), Some("pic.png"));
    assert_eq!(body, "Intro\n\n![pic.png](pic.png)\n");
    assert_eq!(fs::read(fx.posts().join("a/pic.png")).unwrap(), b"\x89PNG fake");

    assert!(!fx.posts().join("b").exists());
    assert!(!fx.posts().join("c").exists());

    let ledger = PublishTracker::load(PublishTracker::ledger_path(&fx.config.site_dir())).unwrap();
    assert_eq!(ledger.len(), 1);
    assert!(ledger.is_published("a.md"));
    assert_eq!(ledger.get("a.md").unwrap().target, target);
}

#[test]
fn publishing_twice_is_byte_identical() {
    let fx = Fixture::new();
    fx.asset("assets/pic.png", b"bytes");
    fx.note("post.md", "---\ntitle: Same\ntags: [go]\npublish: true\n---\n![[pic.png]]\n");

    let mut publisher = fx.publisher();
    let first = publisher.publish_all(&PublishOptions::default()).unwrap();
    let target = fx.posts().join("same/index.md");
    let before = read(&target);

    let second = publisher.publish_all(&PublishOptions::default()).unwrap();
    assert_eq!(read(&target), before);
    assert!(first.emitted[0].changed);
    assert!(!second.emitted[0].changed);
    assert_eq!(publisher.tracker().len(), 1);

    let (emitted, _) = header::parse(&before).unwrap();
    assert!(matches!(emitted.date, Some(NoteDate::Day(_))));
}

#[test]
fn draft_notes_are_published_as_drafts() {
    let fx = Fixture::new();
    fx.note("draft.md", "---\ntitle: Draft\ndraft: true\npublish: true\n---\nwip\n");
    fx.note("final.md", "---\ntitle: Final\npublish: true\n---\ndone\n");

    let mut publisher = fx.publisher();
    publisher.publish_all(&PublishOptions::default()).unwrap();
    let (draft, _) = header::parse(&read(&fx.posts().join("draft/index.md"))).unwrap();
    let (fin, _) = header::parse(&read(&fx.posts().join("final/index.md"))).unwrap();
    assert!(draft.draft);
    assert!(!fin.draft);

    let options = PublishOptions {
        draft: true,
        ..PublishOptions::default()
    };
    publisher.process(&names(&["final.md"]), &options).unwrap();
    let (fin, _) = header::parse(&read(&fx.posts().join("final/index.md"))).unwrap();
    assert!(fin.draft);
}

#[test]
fn first_asset_directory_wins() {
    let mut fx = Fixture::new();
    fx.asset("first/pic.png", b"from first");
    fx.asset("second/pic.png", b"from second");
    fx.config.paths.assets = vec![PathBuf::from("first"), PathBuf::from("second")];
    fx.note("n.md", "---\ntitle: N\npublish: true\n---\n![shot](pic.png)\n");

    let mut publisher = fx.publisher();
    publisher.publish_all(&PublishOptions::default()).unwrap();

    assert_eq!(fs::read(fx.posts().join("n/pic.png")).unwrap(), b"from first");
    let (_, body) = header::parse(&read(&fx.posts().join("n/index.md"))).unwrap();
    assert_eq!(body, "![shot](pic.png)\n");
}

#[test]
fn unpublish_then_republish_uses_current_body() {
    let fx = Fixture::new();
    fx.asset("assets/pic.png", b"bytes");
    fx.note("n.md", "---\ntitle: N\npublish: true\n---\nold body ![[pic.png]]\n");

    let mut publisher = fx.publisher();
    publisher.publish_all(&PublishOptions::default()).unwrap();
    assert!(fx.posts().join("n/index.md").exists());

    let removed = publisher.unpublish(None, &UnpublishOptions::default()).unwrap();
    assert_eq!(removed.removed.len(), 1);
    assert_eq!(removed.removed[0].assets_removed, 1);
    assert!(!fx.posts().join("n").exists());
    assert!(publisher.tracker().is_empty());

    fx.note("n.md", "---\ntitle: N\npublish: true\n---\nnew body\n");
    let selection = publisher.select(&names(&["n"])).unwrap();
    publisher.process(&selection, &PublishOptions::default()).unwrap();

    let (_, body) = header::parse(&read(&fx.posts().join("n/index.md"))).unwrap();
    assert_eq!(body, "new body\n");
    assert_eq!(publisher.tracker().len(), 1);
}

#[test]
fn republish_replays_tracked_notes_only() {
    let fx = Fixture::new();
    fx.note("one.md", "---\ntitle: One\npublish: true\n---\nv1\n");
    fx.note("two.md", "---\ntitle: Two\npublish: true\n---\nv1\n");

    let mut publisher = fx.publisher();
    publisher
        .process(&names(&["one.md"]), &PublishOptions::default())
        .unwrap();

    fx.note("one.md", "---\ntitle: One\npublish: true\n---\nv2\n");
    let result = publisher
        .republish(Some(&names(&["one", "two"])), &PublishOptions::default())
        .unwrap();

    assert_eq!(result.emitted.len(), 1);
    assert_eq!(result.skipped.len(), 1);
    assert_eq!(result.skipped[0].source, "two");
    assert_eq!(result.skipped[0].reason, SkipReason::NotTracked);
    let (_, body) = header::parse(&read(&fx.posts().join("one/index.md"))).unwrap();
    assert_eq!(body, "v2\n");
    assert!(!fx.posts().join("two").exists());
}

#[test]
fn republish_reports_missing_sources() {
    let fx = Fixture::new();
    fx.note("gone.md", "---\ntitle: Gone\npublish: true\n---\nbody\n");

    let mut publisher = fx.publisher();
    publisher.publish_all(&PublishOptions::default()).unwrap();
    fs::remove_file(fx.vault().join("gone.md")).unwrap();

    let result = publisher.republish(None, &PublishOptions::default()).unwrap();
    assert_eq!(result.failed.len(), 1);
    assert_eq!(result.failed[0].error.kind(), "SourceMissing");
    assert!(publisher.tracker().is_published("gone.md"));
}

#[test]
fn unpublishing_untracked_note_is_a_noop() {
    let fx = Fixture::new();
    fx.note("n.md", "---\ntitle: N\npublish: true\n---\nbody\n");

    let mut publisher = fx.publisher();
    let result = publisher
        .unpublish(Some(&names(&["n.md"])), &UnpublishOptions::default())
        .unwrap();

    assert!(result.removed.is_empty());
    assert_eq!(result.skipped.len(), 1);
    assert_eq!(result.skipped[0].reason, SkipReason::NotTracked);
}

#[test]
fn unpublish_can_clear_the_source_flag() {
    let fx = Fixture::new();
    let source = "---\ntitle: Keep Body\npublish: true\ncustom: kept\n---\n\n  exact body\n";
    fx.note("k.md", source);

    let mut publisher = fx.publisher();
    publisher.publish_all(&PublishOptions::default()).unwrap();
    let options = UnpublishOptions {
        clear_flag: true,
        dry_run: false,
    };
    let result = publisher.unpublish(Some(&names(&["k"])), &options).unwrap();
    assert!(result.removed[0].flag_cleared);

    let (cleared, body) = header::parse(&read(&fx.vault().join("k.md"))).unwrap();
    assert!(!cleared.publish);
    assert_eq!(cleared.extra_str("custom"), Some("kept"));
    assert_eq!(body, "\n  exact body\n");

    let again = publisher.publish_all(&PublishOptions::default()).unwrap();
    assert!(again.emitted.is_empty());
}

#[test]
fn retitled_note_moves_its_bundle() {
    let fx = Fixture::new();
    fx.asset("assets/pic.png", b"bytes");
    fx.note("n.md", "---\ntitle: Old Name\npublish: true\n---\n![[pic.png]]\n");

    let mut publisher = fx.publisher();
    publisher.publish_all(&PublishOptions::default()).unwrap();
    assert!(fx.posts().join("old-name/index.md").exists());

    fx.note("n.md", "---\ntitle: New Name\npublish: true\n---\n![[pic.png]]\n");
    publisher.publish_all(&PublishOptions::default()).unwrap();

    assert!(!fx.posts().join("old-name").exists());
    assert!(fx.posts().join("new-name/index.md").exists());
    assert!(fx.posts().join("new-name/pic.png").exists());
    assert_eq!(publisher.tracker().len(), 1);
}

#[test]
fn shared_assets_survive_until_last_reference_goes() {
    let mut fx = Fixture::new();
    fx.config.paths.static_assets = Some(PathBuf::from("static/images"));
    fx.asset("assets/shared.png", b"shared");
    fx.note("x.md", "---\ntitle: X\npublish: true\n---\n![[shared.png]]\n");
    fx.note("y.md", "---\ntitle: Y\npublish: true\n---\n![[shared.png]]\n");
    let image = fx.dir.path().join("site/static/images/shared.png");

    let mut publisher = fx.publisher();
    publisher.publish_all(&PublishOptions::default()).unwrap();
    let (_, body) = header::parse(&read(&fx.posts().join("x/index.md"))).unwrap();
    assert_eq!(body, "![shared.png](/images/shared.png)\n");
    assert!(image.exists());

    publisher
        .unpublish(Some(&names(&["x"])), &UnpublishOptions::default())
        .unwrap();
    assert!(image.exists());

    publisher
        .unpublish(Some(&names(&["y"])), &UnpublishOptions::default())
        .unwrap();
    assert!(!image.exists());
}

#[test]
fn corrupt_ledger_aborts_the_run() {
    let fx = Fixture::new();
    let ledger = PublishTracker::ledger_path(&fx.config.site_dir());
    fs::create_dir_all(ledger.parent().unwrap()).unwrap();
    fs::write(&ledger, "garbage").unwrap();

    let result = Publisher::open(fx.config.clone());
    assert!(matches!(
        result,
        Err(PublishError::Tracker(TrackerError::Corruption { .. }))
    ));
    assert_eq!(read(&ledger), "garbage");
}

#[test]
fn unmapped_tags_extend_the_map_when_enabled() {
    let mut fx = Fixture::new();
    fx.config.tags.auto_extend = true;
    fx.note("food.md", "---\ntitle: Food\ntags: [go, cooking]\npublish: true\n---\nyum\n");

    let mut publisher = fx.publisher();
    publisher.publish_all(&PublishOptions::default()).unwrap();
    let target = fx.posts().join("food/index.md");
    let (emitted, _) = header::parse(&read(&target)).unwrap();
    assert_eq!(emitted.categories, vec!["programming", "uncategorized"]);

    let map = TagCategoryMap::load(&fx.config.tags.map).unwrap();
    assert_eq!(map.lookup("cooking"), Some(&["uncategorized".to_string()][..]));

    let before = read(&target);
    let mut reopened = fx.publisher();
    reopened.publish_all(&PublishOptions::default()).unwrap();
    assert_eq!(read(&target), before);
}

#[test]
fn callouts_and_summary_are_applied() {
    let mut fx = Fixture::new();
    fx.config.posts.auto_summary = true;
    fx.config.posts.summary_length = 30;
    fx.note(
        "c.md",
        "---\ntitle: Callouts\npublish: true\n---\nSome opening words for the summary.\n\n> [!tip] Hint\n> Use it\n",
    );

    let mut publisher = fx.publisher();
    publisher.publish_all(&PublishOptions::default()).unwrap();

    let (emitted, body) = header::parse(&read(&fx.posts().join("callouts/index.md"))).unwrap();
    assert_eq!(emitted.description.as_deref(), Some("Some opening words for the..."));
    assert!(body.contains("{{< admonition type=\"tip\" title=\"Hint\" >}}\nUse it\n{{< /admonition >}}"));
}

#[test]
fn summary_leaves_out_callout_and_embed_markup() {
    let mut fx = Fixture::new();
    fx.config.posts.auto_summary = true;
    fx.asset("assets/pic.png", b"bytes");
    fx.note(
        "s.md",
        "---\ntitle: Summary\npublish: true\n---\n> [!note] Heads up\n> Read this\n\n![[pic.png]]\n\nReal text.\n",
    );

    let mut publisher = fx.publisher();
    publisher.publish_all(&PublishOptions::default()).unwrap();

    let (emitted, _) = header::parse(&read(&fx.posts().join("summary/index.md"))).unwrap();
    assert_eq!(emitted.description.as_deref(), Some("Heads up Read this Real text."));
}

/// Replace the ledger file with a directory so every save fails.
fn make_ledger_unwritable(fx: &Fixture) {
    let ledger = PublishTracker::ledger_path(&fx.config.site_dir());
    if ledger.is_file() {
        fs::remove_file(&ledger).unwrap();
    }
    fs::create_dir_all(&ledger).unwrap();
}

#[test]
fn ledger_write_failure_fails_only_that_note() {
    let fx = Fixture::new();
    fx.asset("assets/pic.png", b"bytes");
    fx.note("a.md", "---\ntitle: A\npublish: true\n---\n![[pic.png]]\n");
    fx.note("b.md", "---\ntitle: B\npublish: true\n---\nb body\n");

    let mut publisher = fx.publisher();
    make_ledger_unwritable(&fx);
    let result = publisher
        .process(&names(&["a.md", "b.md"]), &PublishOptions::default())
        .unwrap();

    assert!(result.emitted.is_empty());
    let failed: Vec<_> = result.failed.iter().map(|f| (f.source.as_str(), f.error.kind())).collect();
    assert_eq!(failed, vec![("a.md", "TargetWrite"), ("b.md", "TargetWrite")]);
    assert!(publisher.tracker().is_empty());
    assert!(!fx.posts().join("a").exists());
    assert!(!fx.posts().join("b").exists());
}

#[test]
fn ledger_write_failure_keeps_the_previous_emission() {
    let fx = Fixture::new();
    fx.note("n.md", "---\ntitle: N\npublish: true\n---\nv1\n");
    let target = fx.posts().join("n/index.md");

    let mut publisher = fx.publisher();
    publisher.publish_all(&PublishOptions::default()).unwrap();
    let before = read(&target);
    let record = publisher.tracker().get("n.md").cloned().unwrap();

    fx.note("n.md", "---\ntitle: N\npublish: true\n---\nv2\n");
    make_ledger_unwritable(&fx);

    let result = publisher.publish_all(&PublishOptions::default()).unwrap();
    assert_eq!(result.failed.len(), 1);
    assert_eq!(result.failed[0].error.kind(), "TargetWrite");
    assert_eq!(read(&target), before);
    assert_eq!(publisher.tracker().get("n.md"), Some(&record));

    let removed = publisher.unpublish(None, &UnpublishOptions::default()).unwrap();
    assert!(removed.removed.is_empty());
    assert_eq!(removed.failed.len(), 1);
    assert_eq!(removed.failed[0].error.kind(), "TargetWrite");
    assert_eq!(read(&target), before);
    assert!(publisher.tracker().is_published("n.md"));
}

#[test]
fn attached_image_is_linked_and_removed_with_the_post() {
    let fx = Fixture::new();
    fx.note("n.md", "---\ntitle: N\npublish: true\n---\nbody\n");
    let image = fx.dir.path().join("downloads/My Shot.png");
    fs::create_dir_all(image.parent().unwrap()).unwrap();
    fs::write(&image, b"shot").unwrap();

    let mut publisher = fx.publisher();
    publisher.publish_all(&PublishOptions::default()).unwrap();
    let attached = publisher.attach_image("n", &image, "shot", false).unwrap();

    assert_eq!(attached.markdown, "![shot](My-Shot.png)");
    let (_, body) = header::parse(&read(&fx.posts().join("n/index.md"))).unwrap();
    assert_eq!(body, "![shot](My-Shot.png)\n\nbody\n");
    assert_eq!(fs::read(fx.posts().join("n/My-Shot.png")).unwrap(), b"shot");

    let ledger = PublishTracker::load(PublishTracker::ledger_path(&fx.config.site_dir())).unwrap();
    assert_eq!(ledger.get("n.md").unwrap().assets.len(), 1);

    let removed = publisher.unpublish(None, &UnpublishOptions::default()).unwrap();
    assert_eq!(removed.removed[0].assets_removed, 1);
    assert!(!fx.posts().join("n").exists());

    let again = publisher.attach_image("n", &image, "", false);
    assert!(matches!(again, Err(PublishError::NotPublished(name)) if name == "n"));
}
