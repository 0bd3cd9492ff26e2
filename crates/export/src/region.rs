//! Wall-height crop regions and the outputs they contribute to an export round.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::Serialize;

/// Tile counts a wall region may span.
pub const TILE_RANGE: std::ops::RangeInclusive<u32> = 1..=15;

/// One mounted crop control: a wall section spanning `tiles` tiles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WallRegion {
	pub label: String,
	pub tile_width: u32,
	pub tile_height: u32,
	pub tiles: u32,
}

/// Target dimensions for one exported image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSpec {
	pub name: String,
	pub width: u32,
	pub height: u32,
}

/// Exported image metadata. Pixel encoding happens outside this tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputImage {
	pub name: String,
	pub width: u32,
	pub height: u32,
	pub region: String,
}

impl WallRegion {
	/// Output width covers every tile at the region's tile height.
	///
	/// Parsed regions always fit; hand-built ones saturate at `u32::MAX`.
	pub fn output_specs(&self) -> Vec<OutputSpec> {
		vec![OutputSpec {
			name: self.label.clone(),
			width: self.tiles.saturating_mul(self.tile_width),
			height: self.tile_height,
		}]
	}

	/// Texture scale applied across the wall.
	pub fn diffuse_uv_scale(&self) -> f64 {
		1.0 / f64::from(self.tiles)
	}

	/// Renders every output spec, simulating `delay` of encoding work per image.
	pub async fn render(self: Arc<Self>, delay: Duration) -> anyhow::Result<Vec<OutputImage>> {
		let mut images = Vec::new();
		for spec in self.output_specs() {
			if !delay.is_zero() {
				tokio::time::sleep(delay).await;
			}
			tracing::debug!(
				region = %self.label,
				name = %spec.name,
				width = spec.width,
				height = spec.height,
				uv_scale = self.diffuse_uv_scale(),
				"export.render"
			);
			images.push(OutputImage {
				name: spec.name,
				width: spec.width,
				height: spec.height,
				region: self.label.clone(),
			});
		}
		Ok(images)
	}
}

impl FromStr for WallRegion {
	type Err = anyhow::Error;

	/// Parses `LABEL:TILE_WIDTH:TILE_HEIGHT:TILES`.
	fn from_str(s: &str) -> anyhow::Result<Self> {
		let parts: Vec<&str> = s.split(':').collect();
		let [label, tile_width, tile_height, tiles] = parts.as_slice() else {
			bail!("expected LABEL:TILE_WIDTH:TILE_HEIGHT:TILES, got {s:?}");
		};
		if label.is_empty() {
			bail!("region label must not be empty");
		}
		let region = Self {
			label: (*label).to_string(),
			tile_width: tile_width.parse().with_context(|| format!("invalid tile width {tile_width:?}"))?,
			tile_height: tile_height.parse().with_context(|| format!("invalid tile height {tile_height:?}"))?,
			tiles: tiles.parse().with_context(|| format!("invalid tile count {tiles:?}"))?,
		};
		if !TILE_RANGE.contains(&region.tiles) {
			bail!("tile count {} outside {}..={}", region.tiles, TILE_RANGE.start(), TILE_RANGE.end());
		}
		if region.tile_width == 0 || region.tile_height == 0 {
			bail!("tile dimensions must be non-zero");
		}
		if region.tiles.checked_mul(region.tile_width).is_none() {
			bail!("{} tiles of width {} exceed the maximum output width", region.tiles, region.tile_width);
		}
		Ok(region)
	}
}

#[cfg(test)]
mod tests {
	use cropwall_barrier::{BarrierConfig, ProducerId, RoundBarrier};

	use super::*;

	#[test]
	fn parses_region_and_sizes_output() {
		let region: WallRegion = "hallway:512:2048:3".parse().unwrap();
		assert_eq!(region.label, "hallway");

		let specs = region.output_specs();
		assert_eq!(
			specs,
			vec![OutputSpec {
				name: "hallway".into(),
				width: 1536,
				height: 2048,
			}]
		);
		assert!((region.diffuse_uv_scale() - 1.0 / 3.0).abs() < f64::EPSILON);
	}

	#[test]
	fn rejects_malformed_regions() {
		assert!("hallway:512:2048".parse::<WallRegion>().is_err());
		assert!(":512:2048:3".parse::<WallRegion>().is_err());
		assert!("hallway:wide:2048:3".parse::<WallRegion>().is_err());
		assert!("hallway:512:2048:16".parse::<WallRegion>().is_err());
		assert!("hallway:512:2048:0".parse::<WallRegion>().is_err());
		assert!("hallway:0:2048:2".parse::<WallRegion>().is_err());
		assert!("wide:4294967295:10:2".parse::<WallRegion>().is_err());
		assert!("wide:2147483647:10:2".parse::<WallRegion>().is_ok());
	}

	#[tokio::test]
	async fn regions_export_in_mount_order() {
		let barrier = RoundBarrier::new(BarrierConfig::named("export-crops"));
		let slow = Arc::new("slow:100:200:2".parse::<WallRegion>().unwrap());
		let fast = Arc::new("fast:100:300:1".parse::<WallRegion>().unwrap());
		{
			let slow = Arc::clone(&slow);
			barrier.register(ProducerId::new(0), move || Arc::clone(&slow).render(Duration::from_millis(20))).unwrap();
		}
		{
			let fast = Arc::clone(&fast);
			barrier.register(ProducerId::new(1), move || Arc::clone(&fast).render(Duration::ZERO)).unwrap();
		}

		let images = barrier.trigger_and_await().await.unwrap();
		let names: Vec<_> = images.iter().map(|i| (i.name.as_str(), i.width, i.height)).collect();
		assert_eq!(names, vec![("slow", 200, 200), ("fast", 100, 300)]);
	}
}
