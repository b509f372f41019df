use std::collections::HashMap;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use super::{Block, BlockId, BlockModel, Record};

/// Block types known to the scene core, as `(type, parent)` pairs.
const NIF_TYPES: &[(&str, &str)] = &[
    ("NiObjectNET", "NiObject"),
    ("NiAVObject", "NiObjectNET"),
    ("NiNode", "NiAVObject"),
    ("NiSwitchNode", "NiNode"),
    ("NiLODNode", "NiSwitchNode"),
    ("NiBillboardNode", "NiNode"),
    ("BSFadeNode", "NiNode"),
    ("BSLeafAnimNode", "NiNode"),
    ("BSMultiBoundNode", "NiNode"),
    ("NiGeometry", "NiAVObject"),
    ("NiTriBasedGeom", "NiGeometry"),
    ("NiTriShape", "NiTriBasedGeom"),
    ("NiTriStrips", "NiTriBasedGeom"),
    ("BSTriShape", "NiAVObject"),
    ("NiProperty", "NiObjectNET"),
    ("NiAlphaProperty", "NiProperty"),
    ("NiMaterialProperty", "NiProperty"),
    ("NiTexturingProperty", "NiProperty"),
    ("NiSpecularProperty", "NiProperty"),
    ("NiStencilProperty", "NiProperty"),
    ("NiVertexColorProperty", "NiProperty"),
    ("NiWireframeProperty", "NiProperty"),
    ("NiZBufferProperty", "NiProperty"),
    ("BSShaderProperty", "NiProperty"),
    ("BSLightingShaderProperty", "BSShaderProperty"),
    ("BSEffectShaderProperty", "BSShaderProperty"),
    ("NiTimeController", "NiObject"),
    ("NiInterpController", "NiTimeController"),
    ("NiSingleInterpController", "NiInterpController"),
    ("NiKeyframeController", "NiSingleInterpController"),
    ("NiTransformController", "NiKeyframeController"),
    ("NiMultiTargetTransformController", "NiInterpController"),
    ("NiControllerManager", "NiTimeController"),
    ("NiBoolInterpController", "NiSingleInterpController"),
    ("NiVisController", "NiBoolInterpController"),
    ("NiFloatInterpController", "NiSingleInterpController"),
    ("NiAlphaController", "NiFloatInterpController"),
    ("NiInterpolator", "NiObject"),
    ("NiKeyBasedInterpolator", "NiInterpolator"),
    ("NiTransformInterpolator", "NiKeyBasedInterpolator"),
    ("NiFloatInterpolator", "NiKeyBasedInterpolator"),
    ("NiBoolInterpolator", "NiKeyBasedInterpolator"),
    ("NiBoolTimelineInterpolator", "NiBoolInterpolator"),
    ("NiBSplineInterpolator", "NiInterpolator"),
    ("NiBSplineTransformInterpolator", "NiBSplineInterpolator"),
    ("NiBSplineCompTransformInterpolator", "NiBSplineTransformInterpolator"),
    ("NiSequence", "NiObject"),
    ("NiControllerSequence", "NiSequence"),
    ("NiStringPalette", "NiObject"),
    ("NiExtraData", "NiObject"),
    ("NiTextKeyExtraData", "NiExtraData"),
    ("BSBound", "NiExtraData"),
    ("BSFurnitureMarker", "NiExtraData"),
    ("BSFurnitureMarkerNode", "BSFurnitureMarker"),
    ("NiKeyframeData", "NiObject"),
    ("NiTransformData", "NiKeyframeData"),
    ("NiVisData", "NiObject"),
    ("NiBoolData", "NiObject"),
    ("NiBSplineData", "NiObject"),
    ("NiBSplineBasisData", "NiObject"),
    ("NiLODData", "NiObject"),
    ("NiRangeLODData", "NiLODData"),
    ("BSMultiBound", "NiObject"),
    ("BSMultiBoundData", "NiObject"),
    ("BSMultiBoundAABB", "BSMultiBoundData"),
    ("BSMultiBoundOBB", "BSMultiBoundData"),
    ("NiCollisionObject", "NiObject"),
    ("bhkNiCollisionObject", "NiCollisionObject"),
    ("bhkCollisionObject", "bhkNiCollisionObject"),
    ("bhkSPCollisionObject", "bhkNiCollisionObject"),
    ("bhkRefObject", "NiObject"),
    ("bhkSerializable", "bhkRefObject"),
    ("bhkWorldObject", "bhkSerializable"),
    ("bhkEntity", "bhkWorldObject"),
    ("bhkRigidBody", "bhkEntity"),
    ("bhkRigidBodyT", "bhkRigidBody"),
    ("bhkConstraint", "bhkSerializable"),
    ("bhkShape", "bhkSerializable"),
];

/// An in-memory block graph.
///
/// Blocks are addressed by their position. Removing a block leaves a hole so
/// the remaining links stay stable, which is how tools simulate a model edit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryModel {
    #[serde(default)]
    user_version: u32,
    #[serde(default)]
    roots: Vec<BlockId>,
    #[serde(default)]
    types: HashMap<String, String>,
    blocks: Vec<Option<Block>>,
}

impl MemoryModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a model from its JSON form.
    ///
    /// Blocks are numbered by their position in the `blocks` array.
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let mut model: MemoryModel =
            serde_json::from_str(json).context("Failed to decode block model JSON")?;

        for (i, block) in model.blocks.iter_mut().enumerate() {
            if let Some(block) = block {
                block.id = i as BlockId;
            }
        }

        for &root in &model.roots {
            if model.block(root).is_none() {
                bail!("Root link {} does not resolve to a block", root);
            }
        }

        Ok(model)
    }

    pub fn to_json_string(&self) -> anyhow::Result<String> {
        serde_json::to_string_pretty(self).context("Failed to encode block model JSON")
    }

    /// Appends a block and returns its link.
    pub fn add_block(&mut self, type_name: &str, fields: Record) -> BlockId {
        let id = self.blocks.len() as BlockId;
        self.blocks.push(Some(Block::new(id, type_name, fields)));
        id
    }

    /// Replaces the fields of an existing block.
    pub fn set_fields(&mut self, id: BlockId, fields: Record) {
        if let Some(block) = self.block_mut(id) {
            block.fields = fields;
        }
    }

    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut Block> {
        self.blocks.get_mut(id as usize).and_then(Option::as_mut)
    }

    /// Removes a block, leaving every other link untouched.
    pub fn remove_block(&mut self, id: BlockId) -> Option<Block> {
        let removed = self.blocks.get_mut(id as usize).and_then(Option::take);
        self.roots.retain(|&r| r != id);
        removed
    }

    pub fn add_root(&mut self, id: BlockId) {
        if !self.roots.contains(&id) {
            self.roots.push(id);
        }
    }

    pub fn set_user_version(&mut self, version: u32) {
        self.user_version = version;
    }

    /// Registers a block type that is not part of the built-in hierarchy.
    pub fn register_type(&mut self, type_name: &str, parent: &str) {
        self.types.insert(type_name.to_string(), parent.to_string());
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    fn parent_type(&self, type_name: &str) -> Option<&str> {
        if let Some(parent) = self.types.get(type_name) {
            return Some(parent.as_str());
        }
        NIF_TYPES
            .iter()
            .find(|(name, _)| *name == type_name)
            .map(|(_, parent)| *parent)
    }
}

impl BlockModel for MemoryModel {
    fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id as usize).and_then(Option::as_ref)
    }

    fn inherits(&self, type_name: &str, ancestor: &str) -> bool {
        // A chain longer than the number of known types has a cycle.
        let limit = NIF_TYPES.len() + self.types.len() + 1;
        let mut current = Some(type_name);
        for _ in 0..=limit {
            let Some(t) = current else {
                return false;
            };
            if t == ancestor {
                return true;
            }
            current = self.parent_type(t);
        }
        log::debug!("Cyclic type hierarchy at {}", type_name);
        false
    }

    fn root_links(&self) -> Vec<BlockId> {
        if self.roots.is_empty() && self.block(0).is_some() {
            return vec![0];
        }
        self.roots.clone()
    }

    fn user_version(&self) -> u32 {
        self.user_version
    }
}
