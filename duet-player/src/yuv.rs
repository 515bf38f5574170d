//! YUV 4:2:0 → RGBA conversion for the on-screen texture.
//!
//! BT.601 limited range, fixed point with pre-computed lookup tables.

use duet_core::PlaneView;

pub struct YuvConverter {
    y_table: [i32; 256],
    u_table_g: [i32; 256],
    u_table_b: [i32; 256],
    v_table_r: [i32; 256],
    v_table_g: [i32; 256],
}

impl YuvConverter {
    pub fn bt601() -> Self {
        let mut converter = Self {
            y_table: [0; 256],
            u_table_g: [0; 256],
            u_table_b: [0; 256],
            v_table_r: [0; 256],
            v_table_g: [0; 256],
        };
        // 8.8 fixed point: 298/256 ≈ 1.164, 409/256 ≈ 1.596, ...
        for i in 0..256 {
            let y = i as i32 - 16;
            let uv = i as i32 - 128;
            converter.y_table[i] = y * 298;
            converter.u_table_g[i] = -uv * 100;
            converter.u_table_b[i] = uv * 516;
            converter.v_table_r[i] = uv * 409;
            converter.v_table_g[i] = -uv * 208;
        }
        converter
    }

    /// Convert `picture` into tightly packed RGBA. `rgba` is resized to fit.
    pub fn convert(&self, picture: &PlaneView<'_>, rgba: &mut Vec<u8>) {
        let width = picture.width as usize;
        let height = picture.height as usize;
        rgba.resize(width * height * 4, 0);
        if width == 0 {
            return;
        }

        let [y_plane, u_plane, v_plane] = picture.planes;
        let [y_stride, u_stride, v_stride] = picture.strides;

        for (row, out) in rgba.chunks_exact_mut(width * 4).enumerate() {
            let y_row = &y_plane[row * y_stride..];
            let u_row = &u_plane[(row / 2) * u_stride..];
            let v_row = &v_plane[(row / 2) * v_stride..];

            for (x, px) in out.chunks_exact_mut(4).enumerate() {
                let y = self.y_table[y_row[x] as usize];
                let u = u_row[x / 2] as usize;
                let v = v_row[x / 2] as usize;

                px[0] = ((y + self.v_table_r[v] + 128) >> 8).clamp(0, 255) as u8;
                px[1] = ((y + self.u_table_g[u] + self.v_table_g[v] + 128) >> 8).clamp(0, 255) as u8;
                px[2] = ((y + self.u_table_b[u] + 128) >> 8).clamp(0, 255) as u8;
                px[3] = 255;
            }
        }
    }
}
