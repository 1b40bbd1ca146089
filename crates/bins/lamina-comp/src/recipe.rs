//! TOML recipes describing what to build and where to write it.
use base::{error::Error, io::ReadFileError};
use layer::{AddingOptions, CoatedMaterial, StorageOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Output file used when neither the recipe nor the command line names one.
pub const DEFAULT_OUTPUT: &str = "output.bsdf";

/// Everything needed to produce one BSDF file.
///
/// ```toml
/// output = "coated-gold.bsdf"
///
/// [material]
/// coating = { eta = 1.5, alpha = 0.1 }
/// substrates = [
///     { eta = [0.143, 3.983], alpha = 0.1 },
///     { eta = [0.374, 2.385], alpha = 0.1 },
///     { eta = [1.442, 1.603], alpha = 0.1 },
/// ]
///
/// [adding]
/// method = { method = "direct" }
///
/// [storage]
/// precision = "f32"
/// compression = "zlib"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    /// Where to write the file.
    #[serde(default)]
    pub output: Option<PathBuf>,
    /// The material to build.
    pub material: CoatedMaterial,
    /// Options of the adding operator.
    #[serde(default)]
    pub adding: AddingOptions,
    /// Sample encoding of the written file.
    #[serde(default)]
    pub storage: StorageOptions,
}

impl Recipe {
    /// The built-in coated gold material with default options.
    pub fn coated_gold() -> Self {
        Self {
            output: None,
            material: CoatedMaterial::coated_gold(),
            adding: AddingOptions::default(),
            storage: StorageOptions::default(),
        }
    }

    /// Loads a recipe from a TOML file.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|err| ReadFileError::from_std_io_error(path, err))?;
        Self::parse(&content).map_err(|err| match err {
            Error::InvalidConfig(msg) => {
                Error::InvalidConfig(format!("{}: {}", path.display(), msg))
            },
            other => other,
        })
    }

    /// Parses a recipe from TOML.
    pub fn parse(content: &str) -> Result<Self, Error> {
        let recipe: Recipe =
            toml::from_str(content).map_err(|err| Error::InvalidConfig(err.to_string()))?;
        if recipe.material.substrates.is_empty() {
            return Err(Error::InvalidConfig("no substrate given".into()));
        }
        Ok(recipe)
    }

    /// Output path, preferring `overridden` over the recipe's own.
    pub fn output(&self, overridden: Option<&Path>) -> PathBuf {
        overridden
            .map(Path::to_path_buf)
            .or_else(|| self.output.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base::io::{CompressionScheme, SamplePrecision};
    use layer::SolveMethod;

    #[test]
    fn documented_recipe_parses() {
        let recipe = Recipe::parse(
            r#"
            output = "coated-gold.bsdf"

            [material]
            coating = { eta = 1.5, alpha = 0.1 }
            substrates = [
                { eta = [0.143, 3.983], alpha = 0.1 },
                { eta = [0.374, 2.385], alpha = 0.1 },
                { eta = [1.442, 1.603], alpha = 0.1 },
            ]

            [adding]
            method = { method = "direct" }

            [storage]
            precision = "f32"
            compression = "zlib"
            "#,
        )
        .unwrap();
        assert_eq!(recipe.material, CoatedMaterial::coated_gold());
        assert_eq!(recipe.adding.method, SolveMethod::Direct);
        assert_eq!(recipe.storage.precision, SamplePrecision::F32);
        assert_eq!(recipe.storage.compression, CompressionScheme::Zlib);
        assert_eq!(recipe.output(None), PathBuf::from("coated-gold.bsdf"));
        assert_eq!(
            recipe.output(Some(Path::new("other.bsdf"))),
            PathBuf::from("other.bsdf")
        );
    }

    #[test]
    fn minimal_recipe_uses_defaults() {
        let recipe = Recipe::parse(
            r#"
            [material]
            coating = { eta = 1.5, alpha = 0.3 }
            substrates = [{ eta = [0.2, 3.0], alpha = 0.3 }]
            "#,
        )
        .unwrap();
        assert_eq!(recipe.adding, AddingOptions::default());
        assert_eq!(recipe.storage, StorageOptions::default());
        assert_eq!(recipe.output(None), PathBuf::from(DEFAULT_OUTPUT));
    }

    #[test]
    fn broken_recipes_are_config_errors() {
        for content in [
            "[material]\ncoating = { eta = 1.5 }\nsubstrates = []",
            "[material]\ncoating = { eta = 1.5, alpha = 0.1 }\nsubstrates = []",
            "output = 3",
        ] {
            assert!(matches!(Recipe::parse(content), Err(Error::InvalidConfig(_))));
        }
        assert!(matches!(
            Recipe::load(Path::new("/nonexistent/lamina/recipe.toml")),
            Err(Error::ReadFile(_))
        ));
    }
}
