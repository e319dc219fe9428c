//! `terrain_mapping.txt`-style configuration.
//!
//! The format is line-oriented: a keyword followed by whitespace-separated
//! parameters, with `;` starting a comment line and double quotes grouping a
//! parameter containing whitespace. Unknown keywords are logged and skipped
//! so newer map files still load.

use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigToken {
    String(String),
    Float(f32),
    Number(i32),
}

impl From<ConfigToken> for String {
    fn from(value: ConfigToken) -> Self {
        match value {
            ConfigToken::String(s) => s,
            _ => Default::default(),
        }
    }
}

impl From<ConfigToken> for i32 {
    fn from(value: ConfigToken) -> Self {
        match value {
            ConfigToken::Number(value) => value,
            _ => Default::default(),
        }
    }
}

impl From<ConfigToken> for u32 {
    fn from(value: ConfigToken) -> Self {
        match value {
            ConfigToken::Number(value) => value.max(0) as u32,
            _ => Default::default(),
        }
    }
}

impl From<ConfigToken> for f32 {
    fn from(value: ConfigToken) -> Self {
        match value {
            ConfigToken::Float(value) => value,
            ConfigToken::Number(value) => value as f32,
            _ => Default::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigLine {
    pub key: String,
    params: Vec<ConfigToken>,
}

impl ConfigLine {
    pub fn param<T: From<ConfigToken> + Default>(&self, index: usize) -> T {
        self.params
            .get(index)
            .cloned()
            .map(T::from)
            .unwrap_or_default()
    }

    pub fn string(&self, index: usize) -> String {
        self.param::<String>(index)
    }
}

fn parse_string(chars: &mut std::iter::Peekable<std::str::Chars>) -> Option<String> {
    while chars.peek().is_some_and(|c| c.is_whitespace()) {
        chars.next();
    }

    let mut result = String::new();

    match chars.peek()? {
        '"' => {
            chars.next(); // Skip opening quote.
            while let Some(&ch) = chars.peek() {
                chars.next();
                if ch == '"' {
                    break;
                }
                result.push(ch);
            }
        }
        _ => {
            while let Some(&ch) = chars.peek() {
                if ch.is_whitespace() {
                    break;
                }
                result.push(ch);
                chars.next();
            }
        }
    }

    Some(result)
}

pub fn parse_line(line: &str) -> Option<ConfigLine> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(';') {
        return None;
    }

    let mut chars = line.chars().peekable();

    let key = parse_string(&mut chars)?;

    let mut params = Vec::new();
    while let Some(param_str) = parse_string(&mut chars) {
        if let Ok(num) = param_str.parse::<i32>() {
            params.push(ConfigToken::Number(num));
        } else if let Ok(num) = param_str.parse::<f32>() {
            params.push(ConfigToken::Float(num));
        } else {
            params.push(ConfigToken::String(param_str));
        }
    }

    Some(ConfigLine { key, params })
}

pub struct ConfigLines {
    lines: Vec<ConfigLine>,
}

impl ConfigLines {
    pub fn parse(s: &str) -> Self {
        Self {
            lines: s.lines().filter_map(parse_line).collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigLine> {
        self.lines.iter()
    }
}

/// The subset of `terrain_mapping.txt` the terrain itself consumes: grid
/// dimensions, world scale and the altitude scale applied to raw height
/// values.
#[derive(Debug, Clone)]
pub struct TerrainMapping {
    /// Height grid cells along X. Must be a power of two.
    pub map_dx: u32,
    /// Height grid cells along Y. Must be a power of two.
    pub map_dy: u32,
    /// World-space width of one grid cell, in centimeters.
    pub nominal_edge_size: f32,
    /// Multiplier from a raw altitude level to centimeters of elevation.
    pub altitude_map_height_base: f32,
}

impl Default for TerrainMapping {
    fn default() -> Self {
        Self {
            map_dx: 0,
            map_dy: 0,
            nominal_edge_size: 16.0,
            altitude_map_height_base: 6.0,
        }
    }
}

impl TerrainMapping {
    pub fn parse(text: &str) -> Self {
        ConfigLines::parse(text).into()
    }
}

impl From<ConfigLines> for TerrainMapping {
    fn from(value: ConfigLines) -> Self {
        let mut terrain_mapping = Self::default();

        for line in value.iter() {
            match line.key.as_str() {
                "SET" => match line.string(0).as_str() {
                    "map_dx" => terrain_mapping.map_dx = line.param(1),
                    "map_dy" => terrain_mapping.map_dy = line.param(1),
                    "nominal_edge_size" => terrain_mapping.nominal_edge_size = line.param(1),
                    "altitude_map_height_base" => {
                        terrain_mapping.altitude_map_height_base = line.param(1)
                    }

                    _ => warn!("Unknown TerrainMapping SET key: {}", line.string(0)),
                },

                _ => warn!("Unknown TerrainMapping key: {}", line.key),
            }
        }

        terrain_mapping
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_set_lines_comments_and_quotes() {
        let text = r#"
            ; generated by the map editor
            SET map_dx 64
            SET map_dy 64
            SET nominal_edge_size 24.5
            SET altitude_map_height_base 6
            SET "nominal_edge_size" 24.5
        "#;

        let mapping = TerrainMapping::parse(text);
        assert_eq!(mapping.map_dx, 64);
        assert_eq!(mapping.map_dy, 64);
        assert_eq!(mapping.nominal_edge_size, 24.5);
        assert_eq!(mapping.altitude_map_height_base, 6.0);
    }

    #[test]
    fn unknown_keys_are_skipped() {
        let text = "SET water_level 3\nSET_WIND_DIRECTION 10.0 10.0\nSET map_dx 32\n";
        let mapping = TerrainMapping::parse(text);
        assert_eq!(mapping.map_dx, 32);
        assert_eq!(mapping.map_dy, 0);
    }

    #[test]
    fn defaults_cover_missing_keys() {
        let mapping = TerrainMapping::parse("");
        assert_eq!(mapping.nominal_edge_size, 16.0);
        assert_eq!(mapping.altitude_map_height_base, 6.0);
    }

    #[test]
    fn tokenizer_distinguishes_numbers_floats_and_strings() {
        let line = parse_line(r#"KEY 12 3.5 "two words" plain"#).unwrap();
        assert_eq!(line.key, "KEY");
        assert_eq!(line.param::<i32>(0), 12);
        assert_eq!(line.param::<f32>(1), 3.5);
        assert_eq!(line.string(2), "two words");
        assert_eq!(line.string(3), "plain");
        // Out of range parameters fall back to defaults.
        assert_eq!(line.param::<i32>(9), 0);
    }
}
