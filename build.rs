use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

#[derive(Deserialize, Default)]
struct ConfigSection {
    page_size: Option<usize>,
    max_pages: Option<usize>,
    batch_min: Option<usize>,
    batch_max: Option<usize>,
    pool_slab_size: Option<usize>,
}

#[derive(Deserialize, Default)]
struct Config {
    #[serde(default)]
    config: ConfigSection,
}

struct ResolvedConfig {
    page_size: usize,
    page_shift: u32,
    max_pages: usize,
    batch_min: usize,
    batch_max: usize,
    pool_slab_size: usize,
}

fn resolve_config(cfg: &ConfigSection) -> ResolvedConfig {
    let page_size = cfg.page_size.unwrap_or(8192);
    assert!(
        page_size > 0 && page_size.is_power_of_two(),
        "page_size ({}) must be a power of 2",
        page_size
    );
    assert!(
        page_size >= 4096,
        "page_size ({}) must be >= 4096",
        page_size
    );

    let max_pages = cfg.max_pages.unwrap_or(128);
    let batch_min = cfg.batch_min.unwrap_or(2);
    let batch_max = cfg.batch_max.unwrap_or(512);
    let pool_slab_size = cfg.pool_slab_size.unwrap_or(128 * 1024);

    assert!(max_pages > 0, "max_pages must be > 0");
    assert!(batch_min >= 1, "batch_min must be >= 1");
    assert!(
        batch_max >= batch_min,
        "batch_max ({}) must be >= batch_min ({})",
        batch_max,
        batch_min
    );
    assert!(
        pool_slab_size >= page_size,
        "pool_slab_size ({}) must be >= page_size ({})",
        pool_slab_size,
        page_size
    );
    assert!(
        pool_slab_size % page_size == 0,
        "pool_slab_size ({}) must be a multiple of page_size ({})",
        pool_slab_size,
        page_size
    );

    ResolvedConfig {
        page_size,
        page_shift: page_size.trailing_zeros(),
        max_pages,
        batch_min,
        batch_max,
        pool_slab_size,
    }
}

fn default_config_path() -> String {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    format!("{}/cmpool.toml", manifest_dir)
}

fn generate_config(cfg: &ResolvedConfig, out_path: &Path) {
    let code = format!(
        "// Auto-generated by build.rs. Do not edit.\n\n\
         pub const PAGE_SHIFT: usize = {};\n\
         pub const PAGE_SIZE: usize = {};\n\
         pub const MAX_PAGES: usize = {};\n\
         pub const BATCH_MIN: usize = {};\n\
         pub const BATCH_MAX: usize = {};\n\
         pub const POOL_SLAB_SIZE: usize = {};\n",
        cfg.page_shift,
        cfg.page_size,
        cfg.max_pages,
        cfg.batch_min,
        cfg.batch_max,
        cfg.pool_slab_size,
    );
    fs::write(out_path, code).expect("failed to write config_gen.rs");
}

fn main() {
    println!("cargo:rerun-if-env-changed=CMPOOL_CONFIG");

    let out_dir = env::var("OUT_DIR").unwrap();

    let config_path = env::var("CMPOOL_CONFIG").unwrap_or_else(|_| default_config_path());
    println!("cargo:rerun-if-changed={}", config_path);
    let content = fs::read_to_string(&config_path)
        .unwrap_or_else(|e| panic!("failed to read {}: {}", config_path, e));

    let config: Config = toml::from_str(&content).expect("failed to parse TOML config");

    let resolved = resolve_config(&config.config);
    generate_config(&resolved, &Path::new(&out_dir).join("config_gen.rs"));
}
