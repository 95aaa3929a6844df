//! Type-checked pipeline builder.

use super::adapter::{ErasedStage, SourceAdapter, TransformAdapter, TypeDescriptor};
use super::{Pipeline, PipelineConfig};
use crate::errors::PipelineError;
use crate::stages::Stage;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

/// Builder for linear pipelines whose last stage produces `Out`.
///
/// Appending is checked by the compiler: a stage can only follow one whose
/// output type equals its input type.
///
/// ```compile_fail
/// use stagechain::prelude::*;
///
/// let source = FnSource::new("numbers", |_: &()| vec![1_u32, 2, 3]);
/// let shout = MapStage::new("shout", |s: String, _: &()| s.to_uppercase());
/// // `shout` expects String but `numbers` produces u32.
/// let _ = PipelineBuilder::new(source).append(shout);
/// ```
pub struct PipelineBuilder<C, Out> {
    /// The pipeline name.
    name: String,
    config: PipelineConfig,
    /// Adapters in execution order; the first one is the source.
    stages: Vec<Arc<dyn ErasedStage<C>>>,
    _output: PhantomData<fn() -> Out>,
}

impl<C, Out> Clone for PipelineBuilder<C, Out> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            config: self.config.clone(),
            stages: self.stages.clone(),
            _output: PhantomData,
        }
    }
}

impl<C, Out> std::fmt::Debug for PipelineBuilder<C, Out> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("name", &self.name)
            .field("stages", &self.stage_names())
            .finish()
    }
}

impl<C, Out> PipelineBuilder<C, Out> {
    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Returns the stage names in order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }
}

impl<C, Out> PipelineBuilder<C, Out>
where
    C: Send + Sync + 'static,
    Out: Send + 'static,
{
    /// Starts a builder from a source stage.
    ///
    /// The pipeline is named after the source until
    /// [`with_name`](Self::with_name) is called.
    #[must_use]
    pub fn new<S>(source: S) -> Self
    where
        S: Stage<C, Input = (), Output = Out>,
    {
        let name = source.name().to_string();
        Self {
            name,
            config: PipelineConfig::default(),
            stages: vec![Arc::new(SourceAdapter::new(source))],
            _output: PhantomData,
        }
    }

    /// Appends a stage consuming this builder's output.
    #[must_use]
    pub fn append<S>(self, stage: S) -> PipelineBuilder<C, S::Output>
    where
        S: Stage<C, Input = Out>,
    {
        self.push(stage)
    }

    /// Appends a stage whose input type is checked at runtime.
    ///
    /// For chains assembled dynamically, where the compiler cannot relate the
    /// stage's input to this builder's output.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::TypeMismatch`] if the stage's input type
    /// differs from this builder's output type. No stage has run at that point.
    pub fn append_erased<S>(self, stage: S) -> Result<PipelineBuilder<C, S::Output>, PipelineError>
    where
        S: Stage<C>,
    {
        let expected = TypeDescriptor::of::<S::Input>();
        let found = self.output_type();
        if expected != found {
            debug!(
                pipeline = %self.name,
                stage = stage.name(),
                expected = expected.name(),
                found = found.name(),
                "rejecting stage with mismatched input type"
            );
            return Err(PipelineError::TypeMismatch {
                stage: stage.name().to_string(),
                expected: expected.name(),
                found: found.name(),
            });
        }
        Ok(self.push(stage))
    }

    fn push<S>(self, stage: S) -> PipelineBuilder<C, S::Output>
    where
        S: Stage<C>,
    {
        let mut stages = self.stages;
        stages.push(Arc::new(TransformAdapter::new(stage)));
        PipelineBuilder {
            name: self.name,
            config: self.config,
            stages,
            _output: PhantomData,
        }
    }

    /// Sets the pipeline name used in logs and summaries.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the execution configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] if the configuration is invalid.
    pub fn with_config(mut self, config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    /// Freezes the builder into an executable pipeline.
    #[must_use]
    pub fn build(self) -> Pipeline<C, Out> {
        Pipeline::new(self.name, self.config, self.stages.into())
    }

    /// Describes the type produced by the last stage.
    #[must_use]
    pub fn output_type(&self) -> TypeDescriptor {
        self.stages
            .last()
            .map_or_else(TypeDescriptor::of::<Out>, |s| s.output())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::{FnSource, MapStage};

    fn words() -> FnSource<(), String, impl Fn(&()) -> Vec<String> + Send + Sync + 'static> {
        FnSource::new("words", |_: &()| vec!["a".to_string(), "bb".to_string()])
    }

    #[test]
    fn test_builder_creation() {
        let builder = PipelineBuilder::new(words());
        assert_eq!(builder.name(), "words");
        assert_eq!(builder.stage_count(), 1);
        assert_eq!(builder.output_type(), TypeDescriptor::of::<String>());
    }

    #[test]
    fn test_builder_append_tracks_output_type() {
        let builder = PipelineBuilder::new(words())
            .append(MapStage::new("len", |s: String, _: &()| s.len()))
            .with_name("lengths");

        assert_eq!(builder.name(), "lengths");
        assert_eq!(builder.stage_names(), vec!["words", "len"]);
        assert_eq!(builder.output_type(), TypeDescriptor::of::<usize>());
    }

    #[test]
    fn test_builder_append_erased_mismatch() {
        let result = PipelineBuilder::new(words())
            .append_erased(MapStage::new("double", |n: u64, _: &()| n * 2));

        let err = result.unwrap_err();
        assert!(matches!(err, PipelineError::TypeMismatch { ref stage, .. } if stage == "double"));
        assert_eq!(err.error_info().unwrap().code, "PIPELINE-001-TYPE_MISMATCH");
    }

    #[test]
    fn test_builder_append_erased_match() {
        let builder = PipelineBuilder::new(words())
            .append_erased(MapStage::new("len", |s: String, _: &()| s.len()))
            .unwrap();
        assert_eq!(builder.stage_count(), 2);
    }

    #[test]
    fn test_builder_source_stays_reusable() {
        let source = PipelineBuilder::new(words());
        let a = source.clone().append(MapStage::new("len", |s: String, _: &()| s.len()));
        let b = source.clone().append(MapStage::new("upper", |s: String, _: &()| s.to_uppercase()));

        assert_eq!(source.stage_count(), 1);
        assert_eq!(a.stage_names(), vec!["words", "len"]);
        assert_eq!(b.stage_names(), vec!["words", "upper"]);
    }

    #[test]
    fn test_builder_debug_lists_stages() {
        let builder = PipelineBuilder::new(words())
            .append(MapStage::new("len", |s: String, _: &()| s.len()))
            .with_name("lengths");

        let rendered = format!("{builder:?}");
        assert!(rendered.contains("lengths"));
        assert!(rendered.contains("\"words\", \"len\""));
    }

    #[test]
    fn test_builder_rejects_zero_buffer() {
        let result = PipelineBuilder::new(words())
            .with_config(PipelineConfig::new().with_buffer_size(0));
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }
}
