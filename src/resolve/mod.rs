use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{Result, TileGraphError};
use crate::graph::SceneGraph;

/// Loads external models referenced by index from the archive's model
/// reference table.
pub trait ModelSource {
    fn load_model(&mut self, index: usize) -> Result<SceneGraph>;
}

/// Loads texture images for local materials.
pub trait TextureSource {
    fn load_texture(&mut self, descriptor: &MaterialDescriptor) -> Result<TextureData>;
}

/// Decoded RGBA8 texture image.
#[derive(Debug, Clone)]
pub struct TextureData {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// A local material as described by the tile stream, before resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialDescriptor {
    pub name: String,
    /// Base color factor [r, g, b, a].
    pub base_color: [f32; 4],
    /// Texture reference, if the material carries one.
    pub texture: Option<String>,
    /// Authored anisotropy; the parser default applies when absent.
    pub anisotropy: Option<f32>,
}

/// A fully resolved material ready to attach to drawables.
#[derive(Debug, Clone)]
pub struct Material {
    pub base_color: [f32; 4],
    pub texture: Option<TextureData>,
    pub max_anisotropy: f32,
}

/// Tile-local materials: descriptors collected during the token walk,
/// with resolution slots filled in afterwards.
#[derive(Debug, Default)]
pub struct LocalMaterialTable {
    descriptors: Vec<MaterialDescriptor>,
    resolved: Vec<Option<Material>>,
}

impl LocalMaterialTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Append a descriptor parsed from the stream.
    pub fn push(&mut self, descriptor: MaterialDescriptor) {
        self.descriptors.push(descriptor);
        self.resolved.push(None);
    }

    pub fn descriptor(&self, index: usize) -> Option<&MaterialDescriptor> {
        self.descriptors.get(index)
    }

    pub fn resolved(&self, index: usize) -> Option<&Material> {
        self.resolved.get(index).and_then(|m| m.as_ref())
    }

    /// Resolve every entry eagerly, in table order, best-effort: a
    /// failing texture load skips that entry and moves on.
    ///
    /// Returns the number of entries resolved by this call.
    pub fn load_all<S: TextureSource>(&mut self, source: &mut S, default_anisotropy: f32) -> usize {
        let mut loaded = 0;
        for index in 0..self.descriptors.len() {
            if self.resolved[index].is_some() {
                continue;
            }
            let descriptor = &self.descriptors[index];

            let texture = if descriptor.texture.is_some() {
                match source.load_texture(descriptor) {
                    Ok(tex) => Some(tex),
                    Err(e) => {
                        warn!(
                            material = %descriptor.name,
                            error = %e,
                            "Failed to load local material texture"
                        );
                        continue;
                    }
                }
            } else {
                None
            };

            self.resolved[index] = Some(Material {
                base_color: descriptor.base_color,
                texture,
                max_anisotropy: descriptor.anisotropy.unwrap_or(default_anisotropy),
            });
            loaded += 1;
        }
        loaded
    }
}

/// Slot table for external models, sized to the archive's reference
/// list. Slots fill lazily through [`ModelTable::request_model`].
#[derive(Debug, Default)]
pub struct ModelTable {
    slots: Vec<Option<Arc<SceneGraph>>>,
}

impl ModelTable {
    pub fn new(count: usize) -> Self {
        Self {
            slots: vec![None; count],
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<SceneGraph>> {
        self.slots.get(index).and_then(|s| s.as_ref())
    }

    pub fn is_resolved(&self, index: usize) -> bool {
        matches!(self.slots.get(index), Some(Some(_)))
    }

    /// Load the model at `index` on demand.
    ///
    /// Idempotent: a slot already resolved returns immediately without
    /// touching the source. A failed load leaves the slot unresolved so
    /// a later call can retry; the failure is reported only to this
    /// call and never unwinds a parse.
    pub fn request_model<S: ModelSource>(&mut self, source: &mut S, index: usize) -> Result<()> {
        if index >= self.slots.len() {
            return Err(TileGraphError::ModelIndexOutOfRange {
                index,
                len: self.slots.len(),
            });
        }
        if self.slots[index].is_some() {
            return Ok(());
        }

        let model = source.load_model(index)?;
        debug!(index, nodes = model.reachable_count(), "Resolved external model");
        self.slots[index] = Some(Arc::new(model));
        Ok(())
    }
}

/// Filesystem-backed texture source: resolves texture references
/// relative to a base directory and decodes them with `image`.
#[derive(Debug)]
pub struct DirTextureSource {
    root: PathBuf,
}

impl DirTextureSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl TextureSource for DirTextureSource {
    fn load_texture(&mut self, descriptor: &MaterialDescriptor) -> Result<TextureData> {
        let Some(ref name) = descriptor.texture else {
            return Err(TileGraphError::ResourceLoad(format!(
                "material '{}' has no texture reference",
                descriptor.name
            )));
        };
        let path = self.root.join(name);
        let img = image::open(&path).map_err(|e| {
            TileGraphError::ResourceLoad(format!(
                "failed to decode texture {}: {e}",
                path.display()
            ))
        })?;
        let rgba = img.to_rgba8();
        debug!(
            path = %path.display(),
            width = rgba.width(),
            height = rgba.height(),
            "Loaded texture"
        );
        Ok(TextureData {
            width: rgba.width(),
            height: rgba.height(),
            rgba: rgba.into_raw(),
        })
    }
}
