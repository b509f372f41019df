use super::controller::{self, Controller};
use crate::model::{Block, BlockId, BlockModel};

/// Unique identifier for a Property in the scene.
pub type PropertyId = u32;

/// Rendering state attached to nodes, shared between them.
#[derive(Debug)]
pub struct Property {
    id: PropertyId,
    block: BlockId,
    type_name: String,
    alpha: bool,
    pub(crate) controllers: Vec<Controller>,
}

impl Property {
    pub fn new<M: BlockModel + ?Sized>(model: &M, id: PropertyId, block: &Block) -> Self {
        Self {
            id,
            block: block.id,
            type_name: block.type_name.clone(),
            alpha: model.inherits(&block.type_name, "NiAlphaProperty"),
            controllers: Vec::new(),
        }
    }

    pub fn id(&self) -> PropertyId {
        self.id
    }

    pub fn block(&self) -> BlockId {
        self.block
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// True for alpha-blending properties, which move a node into the
    /// back-to-front part of the draw order.
    pub fn is_alpha(&self) -> bool {
        self.alpha
    }

    pub fn controllers(&self) -> &[Controller] {
        &self.controllers
    }

    pub fn is_valid<M: BlockModel + ?Sized>(&self, model: &M) -> bool {
        model
            .block(self.block)
            .is_some_and(|b| b.type_name == self.type_name)
    }

    /// Re-synchronizes the controller chain when `changed` is this property's
    /// block or unset, then forwards the change to every controller.
    pub fn update<M: BlockModel + ?Sized>(&mut self, model: &M, changed: Option<BlockId>) {
        let Some(block) = model.block(self.block) else {
            self.controllers.clear();
            return;
        };

        if changed.is_none() || changed == Some(self.block) {
            let existing = std::mem::take(&mut self.controllers);
            let (controllers, fresh) = controller::sync_controllers(model, block, existing, None);
            self.controllers = controllers;
            for i in fresh {
                let own = self.controllers[i].block();
                self.controllers[i].update(model, Some(own));
            }
        }

        for ctrl in self.controllers.iter_mut() {
            ctrl.update(model, changed);
        }
    }

    pub fn find_controller(&self, controller_type: &str, var1: &str, var2: &str) -> Option<usize> {
        controller::find_controller(&self.controllers, controller_type, var1, var2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MemoryModel, Record, Value};

    #[test]
    fn test_alpha_detection() {
        let mut model = MemoryModel::new();
        let alpha = model.add_block("NiAlphaProperty", Record::new());
        let material = model.add_block("NiMaterialProperty", Record::new());

        assert!(Property::new(&model, 0, model.block(alpha).unwrap()).is_alpha());
        assert!(!Property::new(&model, 1, model.block(material).unwrap()).is_alpha());
    }

    #[test]
    fn test_update_reads_controllers() {
        let mut model = MemoryModel::new();
        let ctrl = model.add_block("NiVisController", Record::new().with("Flags", 0x08));
        let prop = model.add_block("NiMaterialProperty", Record::new().with("Controller", Value::link(ctrl)));
        let mut property = Property::new(&model, 0, model.block(prop).unwrap());

        property.update(&model, None);

        assert_eq!(property.controllers().len(), 1);
        assert!(property.controllers()[0].timing.active);
        assert_eq!(property.find_controller("NiVisController", "", ""), Some(0));
    }

    #[test]
    fn test_removed_block_invalidates() {
        let mut model = MemoryModel::new();
        let prop = model.add_block("NiAlphaProperty", Record::new());
        let mut property = Property::new(&model, 0, model.block(prop).unwrap());
        assert!(property.is_valid(&model));

        model.remove_block(prop);
        property.update(&model, None);
        assert!(!property.is_valid(&model));
    }
}
