//! Asset loader: fetch, decode, cache and deduplicate 3D models
//!
//! An [`AssetLoader`] is a cheaply cloneable handle to one cache. Loads are
//! keyed by URL; a cached model is returned as a clone (geometry shared,
//! materials copied) without touching the network. Concurrent requests for
//! the same URL await one shared future, so a model is fetched and decoded
//! at most once at a time. Each attempt runs under a hard timeout and failed
//! attempts are retried with exponential backoff.

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use glam::{Quat, Vec3};
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::LoaderConfig;
use crate::error::{DecodeError, LoadError};
use crate::scene::{Aabb, Geometry, Material, MeshSurface, SceneNode, Transform};

/// Upper bound on the delay between two attempts
pub const MAX_RETRY_DELAY_MS: u64 = 5_000;

/// glTF extensions carrying compressed mesh data
pub const COMPRESSION_EXTENSIONS: [&str; 2] = ["KHR_draco_mesh_compression", "EXT_meshopt_compression"];

/// Parameters of a single `load_model` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadConfig {
    pub url: String,
    pub compression_enabled: bool,
    /// Total attempts, including the first
    pub max_retries: u32,
    pub timeout_ms: u64,
    pub retry_base_delay_ms: u64,
}

impl LoadConfig {
    pub fn new(url: impl Into<String>, defaults: &LoaderConfig) -> Self {
        Self {
            url: url.into(),
            compression_enabled: defaults.compression_enabled,
            max_retries: defaults.max_retries,
            timeout_ms: defaults.timeout_ms,
            retry_base_delay_ms: defaults.retry_base_delay_ms,
        }
    }
}

/// Delay before the attempt following `attempt` (1-based): `base * 2^(attempt-1)`, capped
pub fn retry_delay(base_ms: u64, attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(factor).min(MAX_RETRY_DELAY_MS))
}

/// Source of raw model bytes
#[async_trait]
pub trait ModelFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, LoadError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    pub compression_enabled: bool,
}

/// Decoded asset before bounds are computed
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedModel {
    pub scene: SceneNode,
    pub animations: Vec<AnimationClip>,
}

/// Turns fetched bytes into a scene graph
pub trait ModelDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8], options: &DecodeOptions) -> Result<DecodedModel, DecodeError>;
}

/// Expands compressed mesh data into a plain glTF asset
pub trait MeshDecompressor: Send + Sync {
    fn supports(&self, extension: &str) -> bool;

    /// Rewrite the asset with every compressed primitive expanded
    fn decompress(&self, bytes: &[u8], decoder_path: &str) -> Result<Vec<u8>, DecodeError>;
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AnimationClip {
    pub name: String,
    pub duration_secs: f32,
    pub channels: usize,
}

/// A decoded model with its eagerly computed extents
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedModel {
    pub scene: SceneNode,
    pub animations: Vec<AnimationClip>,
    pub bounds: Aabb,
    pub size: Vec3,
    pub center: Vec3,
}

impl LoadedModel {
    pub fn from_decoded(decoded: DecodedModel) -> Self {
        let bounds = decoded.scene.bounds();
        Self {
            size: bounds.size(),
            center: bounds.center(),
            bounds,
            scene: decoded.scene,
            animations: decoded.animations,
        }
    }

    /// Largest extent along any axis
    pub fn max_extent(&self) -> f32 {
        self.size.max_element()
    }
}

type SharedLoad = Shared<BoxFuture<'static, Result<LoadedModel, LoadError>>>;

struct LoaderInner {
    fetcher: Arc<dyn ModelFetcher>,
    decoder: Arc<dyn ModelDecoder>,
    defaults: LoaderConfig,
    cache: Mutex<HashMap<String, LoadedModel>>,
    in_flight: Mutex<HashMap<String, SharedLoad>>,
    attempts: AtomicU64,
}

/// URL-keyed model cache with in-flight deduplication
#[derive(Clone)]
pub struct AssetLoader {
    inner: Arc<LoaderInner>,
}

impl std::fmt::Debug for AssetLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetLoader")
            .field("cached", &self.cached_count())
            .field("in_flight", &self.inner.in_flight.lock().len())
            .finish()
    }
}

impl AssetLoader {
    pub fn new(fetcher: Arc<dyn ModelFetcher>, decoder: Arc<dyn ModelDecoder>, defaults: LoaderConfig) -> Self {
        Self {
            inner: Arc::new(LoaderInner {
                fetcher,
                decoder,
                defaults,
                cache: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                attempts: AtomicU64::new(0),
            }),
        }
    }

    /// Loader using [`GltfDecoder`] configured from `defaults`
    pub fn with_gltf(fetcher: Arc<dyn ModelFetcher>, defaults: LoaderConfig) -> Self {
        let decoder = Arc::new(GltfDecoder::new(defaults.decoder_path.clone()));
        Self::new(fetcher, decoder, defaults)
    }

    pub fn defaults(&self) -> &LoaderConfig {
        &self.inner.defaults
    }

    /// Load `url` with the loader's default settings
    pub async fn load(&self, url: &str) -> Result<LoadedModel, LoadError> {
        self.load_model(&LoadConfig::new(url, &self.inner.defaults)).await
    }

    pub async fn load_model(&self, config: &LoadConfig) -> Result<LoadedModel, LoadError> {
        if let Some(model) = self.inner.cache.lock().get(&config.url) {
            debug!(url = %config.url, "Model cache hit");
            return Ok(model.clone());
        }

        let shared = {
            let mut in_flight = self.inner.in_flight.lock();
            // The load may have completed between the check above and taking this lock
            if let Some(model) = self.inner.cache.lock().get(&config.url) {
                return Ok(model.clone());
            }
            match in_flight.get(&config.url) {
                Some(pending) => {
                    debug!(url = %config.url, "Joining in-flight model load");
                    pending.clone()
                }
                None => {
                    let pending = Self::load_uncached(self.inner.clone(), config.clone())
                        .boxed()
                        .shared();
                    in_flight.insert(config.url.clone(), pending.clone());
                    pending
                }
            }
        };

        shared.await
    }

    async fn load_uncached(inner: Arc<LoaderInner>, config: LoadConfig) -> Result<LoadedModel, LoadError> {
        let result = inner.load_with_retry(&config).await;
        if let Ok(model) = &result {
            inner.cache.lock().insert(config.url.clone(), model.clone());
        }
        inner.in_flight.lock().remove(&config.url);
        result
    }

    /// Warm the cache; returns how many models are available afterwards
    pub async fn preload(&self, urls: &[String]) -> usize {
        let loads = urls.iter().map(|url| self.load(url));
        let results = futures_util::future::join_all(loads).await;
        results
            .iter()
            .zip(urls)
            .filter(|(result, url)| match result {
                Ok(_) => true,
                Err(e) => {
                    warn!(url = %url, error = %e, "Preload failed");
                    false
                }
            })
            .count()
    }

    pub fn is_cached(&self, url: &str) -> bool {
        self.inner.cache.lock().contains_key(url)
    }

    pub fn cached_count(&self) -> usize {
        self.inner.cache.lock().len()
    }

    /// Drop every cached model; in-flight loads are unaffected
    pub fn clear_cache(&self) {
        let mut cache = self.inner.cache.lock();
        info!(models = cache.len(), "Clearing model cache");
        cache.clear();
    }

    /// Total fetch+decode attempts made by this loader
    pub fn attempt_count(&self) -> u64 {
        self.inner.attempts.load(Ordering::Relaxed)
    }
}

impl LoaderInner {
    async fn load_with_retry(&self, config: &LoadConfig) -> Result<LoadedModel, LoadError> {
        let attempts = config.max_retries.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let started = tokio::time::Instant::now();
            let outcome = tokio::time::timeout(Duration::from_millis(config.timeout_ms), self.attempt(config)).await;
            let error = match outcome {
                Ok(Ok(model)) => {
                    info!(
                        url = %config.url,
                        attempt,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        meshes = model.scene.mesh_count(),
                        "Model loaded"
                    );
                    return Ok(model);
                }
                Ok(Err(e)) => e,
                Err(_) => LoadError::Timeout {
                    url: config.url.clone(),
                    timeout_ms: config.timeout_ms,
                },
            };

            warn!(url = %config.url, attempt, attempts, error = %error, "Model load attempt failed");
            if attempt >= attempts {
                return Err(LoadError::Exhausted {
                    url: config.url.clone(),
                    attempts,
                    last: Box::new(error),
                });
            }
            tokio::time::sleep(retry_delay(config.retry_base_delay_ms, attempt)).await;
        }
    }

    async fn attempt(&self, config: &LoadConfig) -> Result<LoadedModel, LoadError> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        let bytes = self.fetcher.fetch(&config.url).await?;
        let options = DecodeOptions {
            compression_enabled: config.compression_enabled,
        };

        // Off the runtime thread; the attempt timeout must bound decoding too
        let decoder = self.decoder.clone();
        let decoded = tokio::task::spawn_blocking(move || decoder.decode(&bytes, &options))
            .await
            .map_err(|e| LoadError::DecodeTask {
                url: config.url.clone(),
                reason: e.to_string(),
            })?
            .map_err(|source| LoadError::Decode {
                url: config.url.clone(),
                source,
            })?;
        Ok(LoadedModel::from_decoded(decoded))
    }
}

/// glTF 2.0 / GLB decoder
pub struct GltfDecoder {
    decoder_path: String,
    decompressor: Option<Arc<dyn MeshDecompressor>>,
}

impl GltfDecoder {
    pub fn new(decoder_path: impl Into<String>) -> Self {
        Self {
            decoder_path: decoder_path.into(),
            decompressor: None,
        }
    }

    pub fn with_decompressor(mut self, decompressor: Arc<dyn MeshDecompressor>) -> Self {
        self.decompressor = Some(decompressor);
        self
    }

    fn expand_compressed(&self, bytes: &[u8], extension: &str, options: &DecodeOptions) -> Result<Vec<u8>, DecodeError> {
        if !options.compression_enabled {
            return Err(DecodeError::CompressionDisabled {
                extension: extension.to_string(),
            });
        }
        let decompressor = self
            .decompressor
            .as_ref()
            .filter(|d| d.supports(extension))
            .ok_or_else(|| DecodeError::NoDecompressor {
                extension: extension.to_string(),
                decoder_path: self.decoder_path.clone(),
            })?;

        debug!(extension, decoder_path = %self.decoder_path, "Decompressing mesh data");
        let expanded = decompressor.decompress(bytes, &self.decoder_path)?;
        if let Some(left) = compressed_extension(&expanded)? {
            return Err(DecodeError::Decompression(format!("{} still required after decompression", left)));
        }
        Ok(expanded)
    }
}

impl ModelDecoder for GltfDecoder {
    fn decode(&self, bytes: &[u8], options: &DecodeOptions) -> Result<DecodedModel, DecodeError> {
        let expanded;
        let bytes = match compressed_extension(bytes)? {
            Some(extension) => {
                expanded = self.expand_compressed(bytes, &extension, options)?;
                expanded.as_slice()
            }
            None => bytes,
        };

        let (document, buffers, _images) =
            gltf::import_slice(bytes).map_err(|e| DecodeError::Invalid(e.to_string()))?;
        let buffer = |b: gltf::Buffer<'_>| buffers.get(b.index()).map(|data| data.0.as_slice());

        let gltf_scene = document
            .default_scene()
            .or_else(|| document.scenes().next())
            .ok_or(DecodeError::EmptyScene)?;

        let mut geometries: HashMap<(usize, usize), Arc<Geometry>> = HashMap::new();
        let mut root = SceneNode::new(gltf_scene.name().unwrap_or("model"));
        for node in gltf_scene.nodes() {
            root.children.push(convert_node(&node, &buffer, &mut geometries)?);
        }
        if root.mesh_count() == 0 {
            return Err(DecodeError::EmptyScene);
        }

        let animations = document
            .animations()
            .map(|animation| {
                let duration_secs = animation
                    .channels()
                    .filter_map(|channel| channel.reader(buffer).read_inputs())
                    .flatten()
                    .fold(0.0f32, f32::max);
                AnimationClip {
                    name: animation
                        .name()
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("animation_{}", animation.index())),
                    duration_secs,
                    channels: animation.channels().count(),
                }
            })
            .collect();

        Ok(DecodedModel {
            scene: root,
            animations,
        })
    }
}

fn convert_node<'a>(
    node: &gltf::Node<'_>,
    buffer: &impl Fn(gltf::Buffer<'_>) -> Option<&'a [u8]>,
    geometries: &mut HashMap<(usize, usize), Arc<Geometry>>,
) -> Result<SceneNode, DecodeError> {
    let (translation, rotation, scale) = node.transform().decomposed();
    let mut out = SceneNode::new(
        node.name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("node_{}", node.index())),
    )
    .with_transform(Transform {
        translation: Vec3::from(translation),
        rotation: Quat::from_array(rotation),
        scale: Vec3::from(scale),
    });

    if let Some(mesh) = node.mesh() {
        for primitive in mesh.primitives() {
            let key = (mesh.index(), primitive.index());
            let geometry = match geometries.get(&key) {
                Some(g) => g.clone(),
                None => {
                    let reader = primitive.reader(|b| buffer(b));
                    let positions: Vec<Vec3> = reader
                        .read_positions()
                        .ok_or_else(|| DecodeError::Invalid("mesh primitive missing positions".to_string()))?
                        .map(Vec3::from)
                        .collect();
                    let indices = match reader.read_indices() {
                        Some(indices) => indices.into_u32().collect(),
                        None => (0..positions.len() as u32).collect(),
                    };
                    let g = Arc::new(Geometry::new(positions, indices));
                    geometries.insert(key, g.clone());
                    g
                }
            };

            let material = primitive.material();
            let emissive = Vec3::from(material.emissive_factor());
            out.meshes.push(MeshSurface {
                geometry,
                material: Material {
                    name: material.name().unwrap_or("material").to_string(),
                    base_color: material.pbr_metallic_roughness().base_color_factor(),
                    emissive,
                    authored_emissive: emissive,
                },
            });
        }
    }

    for child in node.children() {
        out.children.push(convert_node(&child, buffer, geometries)?);
    }
    Ok(out)
}

#[derive(Deserialize)]
struct ExtensionHeader {
    #[serde(default, rename = "extensionsRequired")]
    extensions_required: Vec<String>,
}

/// JSON part of a glTF asset: the first chunk of a GLB container, or the whole input
fn json_chunk(bytes: &[u8]) -> Result<&[u8], DecodeError> {
    if !bytes.starts_with(b"glTF") {
        return Ok(bytes);
    }
    let header = bytes
        .get(12..20)
        .ok_or_else(|| DecodeError::Invalid("truncated GLB header".to_string()))?;
    let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
    if &header[4..8] != b"JSON" {
        return Err(DecodeError::Invalid("first GLB chunk is not JSON".to_string()));
    }
    bytes
        .get(20..20 + length)
        .ok_or_else(|| DecodeError::Invalid("truncated GLB JSON chunk".to_string()))
}

/// Compression extension the asset cannot be read without, if any
fn compressed_extension(bytes: &[u8]) -> Result<Option<String>, DecodeError> {
    let header: ExtensionHeader =
        serde_json::from_slice(json_chunk(bytes)?).map_err(|e| DecodeError::Invalid(e.to_string()))?;
    Ok(header
        .extensions_required
        .into_iter()
        .find(|ext| COMPRESSION_EXTENSIONS.contains(&ext.as_str())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SAMPLE_GLTF;
    use std::sync::atomic::AtomicU32;

    /// Decoder producing a 1 x 2 x 0.5 box regardless of input
    struct BoxDecoder;

    impl ModelDecoder for BoxDecoder {
        fn decode(&self, bytes: &[u8], _options: &DecodeOptions) -> Result<DecodedModel, DecodeError> {
            if bytes == b"corrupt" {
                return Err(DecodeError::Invalid("corrupt".to_string()));
            }
            Ok(DecodedModel {
                scene: SceneNode::new("box").with_mesh(Geometry::cuboid(Vec3::new(1.0, 2.0, 0.5)), Material::default()),
                animations: Vec::new(),
            })
        }
    }

    /// Fails the first `failures` calls, then serves `body` after `latency`
    struct ScriptedFetcher {
        calls: AtomicU32,
        failures: u32,
        latency: Duration,
        hang_on_failure: bool,
        body: &'static [u8],
    }

    impl ScriptedFetcher {
        fn new(failures: u32) -> Self {
            Self {
                calls: AtomicU32::new(0),
                failures,
                latency: Duration::from_millis(100),
                hang_on_failure: false,
                body: b"model",
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ModelFetcher for ScriptedFetcher {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>, LoadError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                if self.hang_on_failure {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                }
                return Err(LoadError::Fetch {
                    url: url.to_string(),
                    reason: "503 Service Unavailable".to_string(),
                });
            }
            tokio::time::sleep(self.latency).await;
            Ok(self.body.to_vec())
        }
    }

    fn loader(fetcher: Arc<ScriptedFetcher>) -> AssetLoader {
        AssetLoader::new(fetcher, Arc::new(BoxDecoder), LoaderConfig::default())
    }

    const URL: &str = "https://cdn.example.com/models/sofa.glb";

    #[test]
    fn test_retry_delay_doubles_and_caps() {
        assert_eq!(retry_delay(1_000, 1), Duration::from_millis(1_000));
        assert_eq!(retry_delay(1_000, 2), Duration::from_millis(2_000));
        assert_eq!(retry_delay(1_000, 3), Duration::from_millis(4_000));
        assert_eq!(retry_delay(1_000, 4), Duration::from_millis(5_000));
        assert_eq!(retry_delay(1_000, 80), Duration::from_millis(5_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_loads_share_one_fetch() {
        let fetcher = Arc::new(ScriptedFetcher::new(0));
        let loader = loader(fetcher.clone());

        let loads = (0..5).map(|_| loader.load(URL));
        let results = futures_util::future::join_all(loads).await;

        assert_eq!(fetcher.calls(), 1);
        assert_eq!(loader.attempt_count(), 1);
        let models: Vec<LoadedModel> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(models.len(), 5);
        assert!(models.windows(2).all(|w| w[0] == w[1]));
        assert!(loader.is_cached(URL));

        // Cached: no further network traffic
        loader.load(URL).await.unwrap();
        assert_eq!(fetcher.calls(), 1);
    }

    /// Takes `delay` of wall-clock time to decode
    struct SlowDecoder {
        delay: std::time::Duration,
    }

    impl ModelDecoder for SlowDecoder {
        fn decode(&self, bytes: &[u8], options: &DecodeOptions) -> Result<DecodedModel, DecodeError> {
            std::thread::sleep(self.delay);
            BoxDecoder.decode(bytes, options)
        }
    }

    #[tokio::test]
    async fn test_timeout_covers_decoding() {
        let mut fetcher = ScriptedFetcher::new(0);
        fetcher.latency = Duration::ZERO;
        let loader = AssetLoader::new(
            Arc::new(fetcher),
            Arc::new(SlowDecoder {
                delay: Duration::from_millis(600),
            }),
            LoaderConfig {
                timeout_ms: 100,
                max_retries: 1,
                ..LoaderConfig::default()
            },
        );

        let started = std::time::Instant::now();
        let err = loader.load(URL).await.unwrap_err();
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(err.is_timeout());
        assert!(!loader.is_cached(URL));
    }

    #[tokio::test(start_paused = true)]
    async fn test_eventual_success_is_cached() {
        let fetcher = Arc::new(ScriptedFetcher::new(2));
        let loader = loader(fetcher.clone());

        let started = tokio::time::Instant::now();
        let model = loader.load(URL).await.unwrap();

        assert_eq!(fetcher.calls(), 3);
        assert_eq!(loader.attempt_count(), 3);
        assert!(loader.is_cached(URL));
        // Backoff of 1s then 2s
        assert!(started.elapsed() >= Duration::from_millis(3_000));
        assert!(model.size.abs_diff_eq(Vec3::new(1.0, 2.0, 0.5), 1e-6));
        assert_eq!(model.center, Vec3::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_leave_no_entry() {
        let fetcher = Arc::new(ScriptedFetcher::new(3));
        let loader = loader(fetcher.clone());

        let err = loader.load(URL).await.unwrap_err();
        assert!(matches!(err, LoadError::Exhausted { attempts: 3, .. }));
        let ar: crate::error::ArError = err.into();
        assert_eq!(ar.code, crate::error::ArErrorCode::LoadFailed);
        assert!(!loader.is_cached(URL));
        assert_eq!(loader.cached_count(), 0);

        // Nothing left in flight: a later request starts a fresh load
        loader.load(URL).await.unwrap();
        assert_eq!(fetcher.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_attempt() {
        let mut fetcher = ScriptedFetcher::new(1);
        fetcher.hang_on_failure = true;
        let fetcher = Arc::new(fetcher);
        let loader = loader(fetcher.clone());

        let started = tokio::time::Instant::now();
        loader.load(URL).await.unwrap();

        assert_eq!(fetcher.calls(), 2);
        assert!(started.elapsed() >= Duration::from_millis(31_000));
        assert!(started.elapsed() < Duration::from_secs(3600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_timeout_maps_to_timeout_code() {
        let mut fetcher = ScriptedFetcher::new(u32::MAX);
        fetcher.hang_on_failure = true;
        let loader = loader(Arc::new(fetcher));

        let config = LoadConfig {
            max_retries: 2,
            timeout_ms: 1_000,
            ..LoadConfig::new(URL, &LoaderConfig::default())
        };
        let err = loader.load_model(&config).await.unwrap_err();
        assert!(err.is_timeout());
        let ar: crate::error::ArError = err.into();
        assert_eq!(ar.code, crate::error::ArErrorCode::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_decode_failure_is_retried() {
        let mut fetcher = ScriptedFetcher::new(0);
        fetcher.body = b"corrupt";
        let fetcher = Arc::new(fetcher);
        let loader = loader(fetcher.clone());

        let err = loader.load(URL).await.unwrap_err();
        match err {
            LoadError::Exhausted { last, .. } => assert!(matches!(*last, LoadError::Decode { .. })),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consumers_get_independent_clones() {
        let loader = loader(Arc::new(ScriptedFetcher::new(0)));

        let mut first = loader.load(URL).await.unwrap();
        first.scene.set_highlight(Some(Vec3::X));
        let second = loader.load(URL).await.unwrap();

        assert_eq!(second.scene.materials()[0].emissive, Vec3::ZERO);
        assert!(Arc::ptr_eq(&first.scene.meshes[0].geometry, &second.scene.meshes[0].geometry));
    }

    #[tokio::test(start_paused = true)]
    async fn test_preload_and_clear() {
        let loader = loader(Arc::new(ScriptedFetcher::new(0)));
        let urls = vec!["a.glb".to_string(), "b.glb".to_string()];

        assert_eq!(loader.preload(&urls).await, 2);
        assert_eq!(loader.cached_count(), 2);

        loader.clear_cache();
        assert_eq!(loader.cached_count(), 0);
        assert!(!loader.is_cached("a.glb"));
    }

    #[test]
    fn test_gltf_decoder_reads_scene() {
        let decoder = GltfDecoder::new("/draco/");
        let options = DecodeOptions {
            compression_enabled: true,
        };
        let decoded = decoder.decode(SAMPLE_GLTF.as_bytes(), &options).unwrap();
        let model = LoadedModel::from_decoded(decoded);

        assert_eq!(model.scene.mesh_count(), 1);
        assert_eq!(model.scene.children[0].meshes[0].geometry.indices.len(), 36);
        assert!(model.bounds.min.abs_diff_eq(Vec3::new(-0.5, 0.0, -0.5), 1e-6));
        assert!(model.bounds.max.abs_diff_eq(Vec3::new(0.5, 1.0, 0.5), 1e-6));
        assert!(model.size.abs_diff_eq(Vec3::ONE, 1e-6));

        let material = model.scene.materials()[0];
        assert_eq!(material.name, "fabric");
        assert_eq!(material.base_color, [0.5, 0.4, 0.3, 1.0]);
        assert_eq!(material.authored_emissive, Vec3::new(0.1, 0.0, 0.0));

        assert_eq!(model.animations.len(), 1);
        assert_eq!(model.animations[0].name, "spin");
        assert!((model.animations[0].duration_secs - 2.5).abs() < 1e-6);
    }

    #[test]
    fn test_compressed_assets_need_a_decompressor() {
        let draco = r#"{"asset":{"version":"2.0"},"extensionsUsed":["KHR_draco_mesh_compression"],"extensionsRequired":["KHR_draco_mesh_compression"]}"#;
        let decoder = GltfDecoder::new("/draco/");

        let err = decoder
            .decode(draco.as_bytes(), &DecodeOptions { compression_enabled: false })
            .unwrap_err();
        assert!(matches!(err, DecodeError::CompressionDisabled { .. }));

        let err = decoder
            .decode(draco.as_bytes(), &DecodeOptions { compression_enabled: true })
            .unwrap_err();
        assert_eq!(
            err,
            DecodeError::NoDecompressor {
                extension: "KHR_draco_mesh_compression".to_string(),
                decoder_path: "/draco/".to_string(),
            }
        );
    }

    struct InflatingDecompressor;

    impl MeshDecompressor for InflatingDecompressor {
        fn supports(&self, extension: &str) -> bool {
            extension == "KHR_draco_mesh_compression"
        }

        fn decompress(&self, _bytes: &[u8], decoder_path: &str) -> Result<Vec<u8>, DecodeError> {
            assert_eq!(decoder_path, "/draco/");
            Ok(SAMPLE_GLTF.as_bytes().to_vec())
        }
    }

    #[test]
    fn test_decompressor_output_is_decoded() {
        let draco = r#"{"asset":{"version":"2.0"},"extensionsRequired":["KHR_draco_mesh_compression"]}"#;
        let decoder = GltfDecoder::new("/draco/").with_decompressor(Arc::new(InflatingDecompressor));
        let decoded = decoder
            .decode(draco.as_bytes(), &DecodeOptions { compression_enabled: true })
            .unwrap();
        assert_eq!(decoded.scene.mesh_count(), 1);
    }

    #[test]
    fn test_glb_json_chunk() {
        let json = br#"{"extensionsRequired":["EXT_meshopt_compression"]}"#;
        let mut glb = Vec::new();
        glb.extend_from_slice(b"glTF");
        glb.extend_from_slice(&2u32.to_le_bytes());
        glb.extend_from_slice(&((20 + json.len()) as u32).to_le_bytes());
        glb.extend_from_slice(&(json.len() as u32).to_le_bytes());
        glb.extend_from_slice(b"JSON");
        glb.extend_from_slice(json);

        assert_eq!(
            compressed_extension(&glb).unwrap().as_deref(),
            Some("EXT_meshopt_compression")
        );
        assert!(compressed_extension(&glb[..16]).is_err());
    }
}
