// r_config.rs — renderer console variables

use crate::r_local::RefError;

/// Byte layout of lightmap texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LightmapFormat {
    /// 255 = fully lit.
    #[default]
    Luminance,
    /// 255 = black, for modulate-by-inverse blending.
    Inverted,
}

impl LightmapFormat {
    fn name(self) -> &'static str {
        match self {
            LightmapFormat::Luminance => "luminance",
            LightmapFormat::Inverted => "inverted",
        }
    }
}

pub const DEFAULT_MAX_LIGHTMAPS: usize = 64;

/// The renderer's cvars, by their console names.
const CVAR_NAMES: [&str; 6] = [
    "r_novis",
    "r_nocull",
    "r_dynamic",
    "r_fullbright",
    "gl_lightmap_format",
    "gl_max_lightmaps",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderConfig {
    /// r_novis: treat every leaf as visible.
    pub novis: bool,
    /// r_nocull: skip frustum culling.
    pub nocull: bool,
    /// r_dynamic: dynamic lights touch lightmaps.
    pub dynamic: bool,
    /// r_fullbright: build every lightmap fully lit.
    pub fullbright: bool,
    pub lightmap_format: LightmapFormat,
    /// gl_max_lightmaps: lightmap page limit.
    pub max_lightmaps: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        RenderConfig {
            novis: false,
            nocull: false,
            dynamic: true,
            fullbright: false,
            lightmap_format: LightmapFormat::Luminance,
            max_lightmaps: DEFAULT_MAX_LIGHTMAPS,
        }
    }
}

fn parse_value(name: &str, value: &str) -> Result<f32, RefError> {
    value.trim().parse::<f32>().map_err(|_| RefError::BadCvarValue {
        name: name.to_string(),
        value: value.to_string(),
    })
}

fn parse_flag(name: &str, value: &str) -> Result<bool, RefError> {
    Ok(parse_value(name, value)? != 0.0)
}

fn flag_string(b: bool) -> String {
    if b { "1" } else { "0" }.to_string()
}

impl RenderConfig {
    /// Names accepted by `set_cvar` and `cvar_value`.
    pub fn cvar_names() -> &'static [&'static str] {
        &CVAR_NAMES
    }

    /// Set a cvar from its console text.
    pub fn set_cvar(&mut self, name: &str, value: &str) -> Result<(), RefError> {
        match name {
            "r_novis" => self.novis = parse_flag(name, value)?,
            "r_nocull" => self.nocull = parse_flag(name, value)?,
            "r_dynamic" => self.dynamic = parse_flag(name, value)?,
            "r_fullbright" => self.fullbright = parse_flag(name, value)?,
            "gl_lightmap_format" => {
                self.lightmap_format = match value.trim().to_ascii_lowercase().as_str() {
                    "luminance" | "l" => LightmapFormat::Luminance,
                    "inverted" | "i" => LightmapFormat::Inverted,
                    _ => {
                        return Err(RefError::BadCvarValue {
                            name: name.to_string(),
                            value: value.to_string(),
                        })
                    }
                }
            }
            "gl_max_lightmaps" => {
                let v = parse_value(name, value)?;
                if v < 1.0 || v.fract() != 0.0 {
                    return Err(RefError::BadCvarValue {
                        name: name.to_string(),
                        value: value.to_string(),
                    });
                }
                self.max_lightmaps = v as usize;
            }
            _ => return Err(RefError::UnknownCvar(name.to_string())),
        }
        Ok(())
    }

    /// Current value of a cvar as the console would print it.
    pub fn cvar_value(&self, name: &str) -> Result<String, RefError> {
        Ok(match name {
            "r_novis" => flag_string(self.novis),
            "r_nocull" => flag_string(self.nocull),
            "r_dynamic" => flag_string(self.dynamic),
            "r_fullbright" => flag_string(self.fullbright),
            "gl_lightmap_format" => self.lightmap_format.name().to_string(),
            "gl_max_lightmaps" => self.max_lightmaps.to_string(),
            _ => return Err(RefError::UnknownCvar(name.to_string())),
        })
    }
}
