use shared_structs::{CameraData, Float4x4, LightData};
use ultraviolet::{Mat4, Vec3};

/// Column-major matrix in the device's layout.
pub fn matrix_columns(matrix: Mat4) -> Float4x4 {
    matrix
        .cols
        .map(|column| [column.x, column.y, column.z, column.w])
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    /// Radians.
    pub vertical_fov: f32,
    pub aspect_ratio: f32,
    pub z_near: f32,
    pub z_far: f32,
}

impl Camera {
    pub fn projection(&self) -> Mat4 {
        ultraviolet::projection::rh_yup::perspective_vk(
            self.vertical_fov,
            self.aspect_ratio,
            self.z_near,
            self.z_far,
        )
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at(self.position, self.target, Vec3::unit_y())
    }

    /// The per-frame camera record. The biases are added to sampled
    /// metallic and roughness values.
    pub fn data(&self, metallic_bias: f32, roughness_bias: f32) -> CameraData {
        CameraData {
            projection: matrix_columns(self.projection()),
            view: matrix_columns(self.view()),
            position: [self.position.x, self.position.y, self.position.z],
            metallic_bias,
            roughness_bias,
            _padding: [0.0; 3],
        }
    }
}

/// A directional light. Shaders want the direction towards the light.
pub fn light_data(direction: Vec3, intensity: f32) -> LightData {
    let inverse = -direction.normalized();

    LightData {
        inverse_direction: [inverse.x, inverse.y, inverse.z],
        intensity,
    }
}
