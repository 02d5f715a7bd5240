//! Identity stage: publishes its input unchanged.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::Span;

use crate::error::Result;
use crate::factory::{StageBuilder, TransformCtor, check_mailbox_capacity, default_mailbox_capacity, parse_config};
use crate::handle::TransformHandle;
use crate::ids::Uid;
use crate::message::FlowParams;
use crate::node::Node;
use crate::resources::SharedResources;
use crate::stage::{OnClosed, TransformContext, Transformation};
use crate::update::UpdateBatch;

pub const KIND: &str = "example";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct ExampleConfig {
	/// Shared counter key; stages naming the same key count into one counter.
	#[serde(default)]
	pub stats: Option<String>,
	#[serde(default = "default_mailbox_capacity")]
	pub mailbox_capacity: usize,
}

/// Write counter shared through [`SharedResources`].
#[derive(Debug, Default)]
pub struct WriteStats {
	writes: AtomicU64,
}

impl WriteStats {
	pub fn record(&self) {
		self.writes.fetch_add(1, Ordering::Relaxed);
	}

	pub fn writes(&self) -> u64 {
		self.writes.load(Ordering::Relaxed)
	}
}

pub struct ExampleTransformCtor;

#[async_trait]
impl TransformCtor for ExampleTransformCtor {
	fn kind(&self) -> &'static str {
		KIND
	}

	async fn create(&self, uid: Uid, config: &Value, resources: &SharedResources, on_closed: OnClosed, log: Option<Span>) -> Result<TransformHandle> {
		let config: ExampleConfig = parse_config(KIND, config)?;
		let capacity = check_mailbox_capacity(config.mailbox_capacity)?;

		let mut builder = StageBuilder::new(KIND, uid, resources, log).mailbox_capacity(capacity);
		let stats = match config.stats {
			Some(key) => Some(builder.acquire(key, || Ok(WriteStats::default())).await?),
			None => None,
		};
		Ok(builder.spawn(ExampleTransform { stats }, on_closed))
	}
}

/// Mirrors each input node into the output tree.
pub struct ExampleTransform {
	stats: Option<Arc<WriteStats>>,
}

impl Transformation for ExampleTransform {
	fn write(&mut self, ctx: &mut TransformContext<'_>, _sender: Uid, node: Node, _flow: &FlowParams) -> anyhow::Result<UpdateBatch> {
		if let Some(stats) = &self.stats {
			stats.record();
		}
		Ok(ctx.output().diff_to(&node))
	}
}
