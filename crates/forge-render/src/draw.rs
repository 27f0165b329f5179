// SPDX-License-Identifier: CEPL-1.0
use bytemuck::{Pod, Zeroable};
use glam::Mat4;

/// Vertex layout shared by every mesh:
///   - location 0: R32G32B32_SFLOAT (pos)
///   - location 1: R32G32B32_SFLOAT (color)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub color: [f32; 3],
}

/// Handle to geometry previously uploaded to the renderer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(pub u32);

/// Per-draw material inputs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Material {
    /// Multiplied with the vertex color.
    pub tint: [f32; 4],
}

impl Default for Material {
    fn default() -> Self {
        Self { tint: [1.0; 4] }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrawCommand {
    pub mesh: MeshId,
    pub transform: Mat4,
    pub material: Material,
}

impl DrawCommand {
    pub fn new(mesh: MeshId, transform: Mat4) -> Self {
        Self {
            mesh,
            transform,
            material: Material::default(),
        }
    }
}

/// Per-frame view of the scene. Read-only: the renderer never mutates it.
pub trait DrawSource {
    fn view_projection(&self) -> Mat4;
    fn draw_commands(&self) -> &[DrawCommand];
}

/// Plain owned draw list.
#[derive(Clone, Debug, Default)]
pub struct DrawList {
    pub view_projection: Mat4,
    pub commands: Vec<DrawCommand>,
}

impl DrawList {
    pub fn new(view_projection: Mat4) -> Self {
        Self {
            view_projection,
            commands: Vec::new(),
        }
    }

    pub fn push(&mut self, cmd: DrawCommand) {
        self.commands.push(cmd);
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }
}

impl DrawSource for DrawList {
    fn view_projection(&self) -> Mat4 {
        self.view_projection
    }

    fn draw_commands(&self) -> &[DrawCommand] {
        &self.commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_is_tightly_packed() {
        assert_eq!(std::mem::size_of::<Vertex>(), 24);
        let v = [Vertex {
            pos: [1.0, 2.0, 3.0],
            color: [0.5, 0.5, 0.5],
        }];
        let bytes: &[u8] = bytemuck::cast_slice(&v);
        assert_eq!(bytes.len(), 24);
    }

    #[test]
    fn draw_list_exposes_commands_in_order() {
        let mut list = DrawList::new(Mat4::IDENTITY);
        list.push(DrawCommand::new(MeshId(3), Mat4::IDENTITY));
        list.push(DrawCommand::new(MeshId(1), Mat4::from_scale(glam::Vec3::splat(2.0))));

        let ids: Vec<_> = list.draw_commands().iter().map(|c| c.mesh).collect();
        assert_eq!(ids, vec![MeshId(3), MeshId(1)]);
        assert_eq!(list.view_projection(), Mat4::IDENTITY);
    }
}
