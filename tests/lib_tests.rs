use clap::Parser;
use ctxpack::engine::classify::{ClassifyRules, SignatureKey};
use ctxpack::engine::stream::ChunkError;
use ctxpack::engine::tools::{
    canonicalize_lenient, is_contained_relative, is_os_hidden_file, path_to_slash_string,
};
use ctxpack::engine::{
    ChunkReader, ClassifierCache, Cli, Signature, Utf8ChunkDecoder, apply_cli_to_config,
    classify_signature, glob_match, looks_binary, path_relative_to, read_to_string_chunked,
    scan_text_shape, should_include_in_walk,
};
use ctxpack::utils::{LazyFile, apply_file_to_config, parse_ctxpack_toml};
use ctxpack::{
    CancelReason, CancelToken, Category, MemoryPolicy, OutputFormat, OutputOrder, PipelineConfig,
    PipelineError, SkipReason,
};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

// --- path_relative_to ---

#[test]
fn test_path_relative_under_base() {
    let base = PathBuf::from("/foo/bar");
    let path = PathBuf::from("/foo/bar/baz/qux");
    assert_eq!(
        path_relative_to(&path, &base),
        Some(PathBuf::from("baz/qux"))
    );
}

#[test]
fn test_path_relative_not_under_base() {
    let base = PathBuf::from("/foo/bar");
    let path = PathBuf::from("/other/qux");
    assert_eq!(path_relative_to(&path, &base), None);
}

#[test]
fn test_path_relative_with_dotdot_is_not_contained() {
    let base = PathBuf::from("/foo/bar");
    let path = PathBuf::from("/foo/bar/../bar/baz");
    let rel = path_relative_to(&path, &base).unwrap();
    assert_eq!(rel, PathBuf::from("../bar/baz"));
    assert!(!is_contained_relative(&rel));
    assert!(is_contained_relative(Path::new("src/main.rs")));
}

// --- path_to_slash_string ---

#[test]
fn test_path_to_slash_string_forward_slashes() {
    assert_eq!(
        path_to_slash_string(&PathBuf::from("src/main.rs")),
        "src/main.rs"
    );
}

#[test]
fn test_path_to_slash_string_normalizes_backslashes() {
    assert_eq!(
        path_to_slash_string(&PathBuf::from("src\\main.rs")),
        "src/main.rs"
    );
}

#[test]
fn test_canonicalize_lenient_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("out.md");
    let canonical = canonicalize_lenient(&missing).unwrap();
    assert_eq!(canonical, dir.path().canonicalize().unwrap().join("out.md"));
}

// --- glob_match / should_include_in_walk ---

#[test]
fn test_glob_match_literal() {
    assert!(glob_match("node_modules", "node_modules"));
    assert!(!glob_match("node_modules", "node_module"));
}

#[test]
fn test_glob_match_star() {
    assert!(glob_match("*.log", "foo.log"));
    assert!(glob_match("*.log", ".log"));
    assert!(!glob_match("*.log", "foo.log.txt"));
    assert!(glob_match("node_*", "node_modules"));
    assert!(glob_match("src/*.rs", "src/lib.rs"));
}

#[test]
fn test_glob_match_question_mark() {
    assert!(glob_match("?.txt", "a.txt"));
    assert!(!glob_match("?.txt", "ab.txt"));
}

#[test]
fn test_glob_match_negation_stripped() {
    assert!(glob_match("!node_modules", "node_modules"));
}

#[test]
fn test_should_include_root_excluded() {
    let root = PathBuf::from("/foo");
    assert!(!should_include_in_walk(&root, &root, &None, &[], &[]));
}

#[test]
fn test_should_include_output_file_skipped() {
    let root = PathBuf::from("/foo");
    let out = PathBuf::from("/foo/context.md");
    assert!(!should_include_in_walk(
        &out,
        &root,
        &Some(out.clone()),
        &[],
        &[]
    ));
}

#[test]
fn test_should_include_os_junk_skipped() {
    let root = PathBuf::from("/foo");
    assert!(!should_include_in_walk(
        &PathBuf::from("/foo/a/.DS_Store"),
        &root,
        &None,
        &[],
        &[]
    ));
    assert!(is_os_hidden_file(Path::new("Thumbs.db")));
    assert!(is_os_hidden_file(Path::new("._resource")));
    assert!(!is_os_hidden_file(Path::new(".gitignore")));
}

#[test]
fn test_should_include_exclude_pattern_glob() {
    let root = PathBuf::from("/foo");
    let path = PathBuf::from("/foo/bar/baz.log");
    assert!(!should_include_in_walk(
        &path,
        &root,
        &None,
        &["*.log".to_string()],
        &[]
    ));
}

#[test]
fn test_should_include_extension_filter() {
    let root = PathBuf::from("/foo");
    let include = vec!["rs".to_string(), ".toml".to_string()];
    assert!(should_include_in_walk(
        &PathBuf::from("/foo/src/lib.rs"),
        &root,
        &None,
        &[],
        &include
    ));
    assert!(should_include_in_walk(
        &PathBuf::from("/foo/Cargo.TOML"),
        &root,
        &None,
        &[],
        &include
    ));
    assert!(!should_include_in_walk(
        &PathBuf::from("/foo/README.md"),
        &root,
        &None,
        &[],
        &include
    ));
}

#[test]
fn test_should_include_not_excluded() {
    let root = PathBuf::from("/foo");
    let path = PathBuf::from("/foo/bar/baz.txt");
    assert!(should_include_in_walk(
        &path,
        &root,
        &None,
        &["*.log".to_string(), "node_modules".to_string()],
        &[]
    ));
}

// --- classification ---

fn rules(config: &PipelineConfig) -> ClassifyRules {
    ClassifyRules::from_config(config)
}

fn classify(path: &str, config: &PipelineConfig) -> ctxpack::Classification {
    classify_signature(&Signature::for_path(Path::new(path), &rules(config)))
}

#[test]
fn test_classify_known_text_extension() {
    let c = classify("src/main.rs", &PipelineConfig::default());
    assert_eq!(c.category, Category::Text);
    assert_eq!(&*c.language, "rust");
    assert!(!c.ambiguous);
}

#[test]
fn test_classify_special_file_name() {
    let sig = Signature::for_path(Path::new("Makefile"), &ClassifyRules::default());
    assert_eq!(sig.key, SignatureKey::FileName("makefile".to_string()));
    let c = classify_signature(&sig);
    assert_eq!(c.category, Category::Text);
    assert_eq!(&*c.language, "makefile");
}

#[test]
fn test_classify_image_skipped_unless_allowed() {
    let c = classify("logo.png", &PipelineConfig::default());
    assert_eq!(c.category, Category::Skip);
    assert_eq!(c.skip_reason, Some(SkipReason::Image));

    let config = PipelineConfig {
        allow_binary: vec![".PNG".to_string()],
        ..PipelineConfig::default()
    };
    let c = classify("logo.png", &config);
    assert_eq!(c.category, Category::Image);
    assert_eq!(c.skip_reason, None);
}

#[test]
fn test_classify_binary_extension() {
    let c = classify("lib.so", &PipelineConfig::default());
    assert_eq!(c.category, Category::Skip);
    assert_eq!(c.skip_reason, Some(SkipReason::Binary));
}

#[test]
fn test_classify_unknown_extension_is_ambiguous_text() {
    let c = classify("notes.xyz", &PipelineConfig::default());
    assert_eq!(c.category, Category::Text);
    assert!(c.ambiguous);
    assert_eq!(&*c.language, "");
}

#[test]
fn test_classify_language_override() {
    let mut config = PipelineConfig::default();
    config
        .language_overrides
        .insert("tpl".to_string(), "html".to_string());
    let c = classify("page.tpl", &config);
    assert_eq!(c.category, Category::Text);
    assert_eq!(&*c.language, "html");
    assert!(!c.ambiguous);
}

#[test]
fn test_looks_binary() {
    assert!(!looks_binary(b"fn main() {\n\tprintln!(\"hi\");\n}\n"));
    assert!(looks_binary(&[0x7f, b'E', b'L', b'F', 0, 0, 1]));
    assert!(looks_binary(&[1, 2, 3, 4, 5, 6, b'a']));
    assert!(!looks_binary(&[]));
}

// --- ClassifierCache ---

#[test]
fn test_cache_is_idempotent_and_memoizes() {
    let cache = ClassifierCache::new(16);
    let sig = Signature::for_path(Path::new("a.rs"), &ClassifyRules::default());
    let first = cache.lookup(&sig);
    let second = cache.lookup(&sig);
    assert_eq!(first, second);
    assert_eq!(first, classify_signature(&sig));
    assert_eq!(cache.misses(), 1);
    assert_eq!(cache.hits(), 1);
}

#[test]
fn test_cache_never_exceeds_capacity() {
    let cache = ClassifierCache::new(4);
    let rules = ClassifyRules::default();
    for i in 0..50 {
        cache.lookup(&Signature::for_path(
            Path::new(&format!("f.ext{i}")),
            &rules,
        ));
        assert!(cache.len() <= cache.capacity());
    }
    assert_eq!(cache.capacity(), 4);
}

#[test]
fn test_cache_concurrent_lookups_compute_once_per_signature() {
    let cache = Arc::new(ClassifierCache::new(100));
    let names = ["a.rs", "b.go", "c.py", "d.md", "e.unknown"];
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                let rules = ClassifyRules::default();
                for _ in 0..100 {
                    for name in names {
                        cache.lookup(&Signature::for_path(Path::new(name), &rules));
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(cache.misses(), names.len() as u64);
    assert_eq!(cache.hits(), 8 * 100 * names.len() as u64 - names.len() as u64);
}

#[test]
fn test_cache_override_is_part_of_the_key() {
    let cache = ClassifierCache::new(16);
    let mut config = PipelineConfig::default();
    let plain = cache.lookup(&Signature::for_path(Path::new("x.tpl"), &rules(&config)));
    config
        .language_overrides
        .insert("tpl".to_string(), "html".to_string());
    let overridden = cache.lookup(&Signature::for_path(Path::new("x.tpl"), &rules(&config)));
    assert!(plain.ambiguous);
    assert_eq!(&*overridden.language, "html");
    assert_eq!(cache.misses(), 2);
}

// --- UTF-8 chunk decoding ---

#[test]
fn test_decoder_holds_back_split_character() {
    let mut d = Utf8ChunkDecoder::new();
    let bytes = "é".as_bytes();
    assert_eq!(d.decode(&bytes[..1], false), "");
    assert_eq!(d.pending_len(), 1);
    assert_eq!(d.decode(&bytes[1..], false), "é");
    assert_eq!(d.pending_len(), 0);
}

#[test]
fn test_decoder_replaces_invalid_bytes() {
    let mut d = Utf8ChunkDecoder::new();
    assert_eq!(d.decode(&[b'a', 0xff, b'b'], false), "a\u{fffd}b");
}

#[test]
fn test_decoder_truncated_tail_at_end() {
    let mut d = Utf8ChunkDecoder::new();
    assert_eq!(d.decode(&[b'x', 0xe2, 0x82], true), "x\u{fffd}");
}

#[test]
fn test_chunked_read_preserves_multibyte_text() {
    let text = "héllo wörld, ünïcødé → ok\n".repeat(20);
    let out = read_to_string_chunked(
        Cursor::new(text.clone().into_bytes()),
        3,
        None,
        &CancelToken::new(),
    )
    .unwrap();
    assert_eq!(out, text);
}

#[test]
fn test_chunked_read_stops_on_cancel() {
    let cancel = CancelToken::new();
    cancel.cancel(CancelReason::Requested);
    let err = read_to_string_chunked(Cursor::new(b"abc".to_vec()), 1, None, &cancel).unwrap_err();
    assert!(matches!(err, ChunkError::Cancelled));
}

#[test]
fn test_chunked_read_stops_at_deadline() {
    let mut reader = ChunkReader::new(Cursor::new(b"abcdef".to_vec()), 2, Some(Instant::now()));
    let err = reader.next_chunk(&CancelToken::new()).unwrap_err();
    assert!(matches!(err, ChunkError::TimedOut));
    assert_eq!(reader.bytes_read(), 0);
}

#[test]
fn test_scan_text_shape_rewinds_source() {
    let mut text = "a".repeat(100_000);
    text.push_str("``````");
    text.push_str(&"b".repeat(100_000));
    let mut source = Cursor::new(text.clone().into_bytes());
    let shape = scan_text_shape(&mut source, None, &CancelToken::new()).unwrap();
    assert_eq!(shape.longest_backtick_run, 6);
    assert!(!shape.ends_with_newline);
    assert_eq!(source.position(), 0);
    let again = read_to_string_chunked(source, 4096, None, &CancelToken::new()).unwrap();
    assert_eq!(again, text);
}

#[test]
fn test_scan_text_shape_observes_cancel_and_deadline() {
    let cancel = CancelToken::new();
    cancel.cancel(CancelReason::Requested);
    let err = scan_text_shape(&mut Cursor::new(b"x\n".to_vec()), None, &cancel).unwrap_err();
    assert!(matches!(err, ChunkError::Cancelled));
    let err = scan_text_shape(
        &mut Cursor::new(b"x\n".to_vec()),
        Some(Instant::now()),
        &CancelToken::new(),
    )
    .unwrap_err();
    assert!(matches!(err, ChunkError::TimedOut));
}

// --- CancelToken ---

#[test]
fn test_cancel_token_first_reason_wins() {
    let token = CancelToken::new();
    let clone = token.clone();
    assert!(!token.is_cancelled());
    clone.cancel(CancelReason::SinkFailure);
    token.cancel(CancelReason::Requested);
    assert!(token.is_cancelled());
    assert_eq!(token.reason(), Some(CancelReason::SinkFailure));
}

#[test]
fn test_cancel_token_deadline_trips_lazily() {
    let token = CancelToken::new();
    token.arm_timeout(Duration::ZERO);
    assert!(!token.tripped());
    assert!(token.is_cancelled());
    assert!(token.tripped());
    assert_eq!(token.reason(), Some(CancelReason::Timeout));
}

// --- PipelineConfig ---

#[test]
fn test_default_config_is_valid() {
    assert!(PipelineConfig::default().validate().is_ok());
}

#[test]
fn test_config_rejects_zero_capacity() {
    let config = PipelineConfig {
        task_queue_capacity: 0,
        ..PipelineConfig::default()
    };
    assert!(matches!(
        config.validate(),
        Err(PipelineError::Validation(_))
    ));
}

#[test]
fn test_config_rejects_bad_hysteresis() {
    let config = PipelineConfig {
        memory_hysteresis: 1.5,
        ..PipelineConfig::default()
    };
    assert!(config.validate().is_err());
}

// --- .ctxpack.toml / CLI ---

#[test]
fn test_toml_settings_applied() {
    let file = parse_ctxpack_toml(
        r#"
[settings]
format = "json"
order = "traversal"
max_file_size = 1024
memory_limit = 1000000
memory_policy = "shed-largest"
timeout_ms = 500
exclude = ["*.lock"]

[settings.language_overrides]
tpl = "html"
"#,
    )
    .unwrap();
    let mut config = PipelineConfig::default();
    apply_file_to_config(&file, &mut config);
    assert_eq!(config.format, OutputFormat::Json);
    assert_eq!(config.order, OutputOrder::Traversal);
    assert_eq!(config.max_file_size, 1024);
    assert_eq!(config.memory_limit, Some(1_000_000));
    assert_eq!(config.memory_policy, MemoryPolicy::ShedLargest);
    assert_eq!(config.timeout_ms, Some(500));
    assert_eq!(config.exclude, vec!["*.lock".to_string()]);
    assert_eq!(
        config.language_overrides.get("tpl").map(String::as_str),
        Some("html")
    );
    // Untouched fields keep their defaults.
    assert_eq!(config.max_files, PipelineConfig::default().max_files);
}

#[test]
fn test_toml_unknown_key_rejected() {
    assert!(parse_ctxpack_toml("[settings]\nmax_filez = 3\n").is_err());
}

#[test]
fn test_cli_flags_override_config() {
    let cli = Cli::parse_from([
        "ctxpack",
        "src",
        "-f",
        "yaml",
        "--order",
        "traversal",
        "-j",
        "4",
        "--memory-policy",
        "shed-largest",
        "--no-gitignore",
        "-e",
        "*.lock",
        "*.min.js",
    ]);
    let mut config = PipelineConfig {
        exclude: vec!["*.tmp".to_string()],
        ..PipelineConfig::default()
    };
    apply_cli_to_config(&cli, &mut config);
    assert_eq!(cli.dir, PathBuf::from("src"));
    assert_eq!(config.format, OutputFormat::Yaml);
    assert_eq!(config.order, OutputOrder::Traversal);
    assert_eq!(config.concurrency, 4);
    assert_eq!(config.memory_policy, MemoryPolicy::ShedLargest);
    assert!(!config.respect_gitignore);
    assert_eq!(config.exclude, vec!["*.tmp", "*.lock", "*.min.js"]);
}

// --- LazyFile ---

#[test]
fn test_lazy_file_created_on_first_write() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.md");
    let mut file = LazyFile::new(&path);
    file.flush().unwrap();
    assert!(!path.exists());
    assert!(!file.is_created());
    file.write_all(b"# hi\n").unwrap();
    file.flush().unwrap();
    assert!(file.is_created());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "# hi\n");
}
