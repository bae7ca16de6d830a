//! Per-buffer coloring stages run on rayon.
//!
//! ```text
//! prepare_brushes ──► color_buffer ──► (staging) ──► unprepare_brushes
//!   join-all          chunked, parallel                join-all
//! ```
//!
//! Every stage reports failures as `(slot, BrushError)` so the caller can name
//! the offending brush.

use rayon::prelude::*;
use tracing::warn;

use crate::brush::{compress_color, BrushSlot, StagingContext};
use crate::buffer::{BufferParams, ColoredBuffer, Point};
use crate::error::BrushError;

/// Floats written per point before the color slots.
pub const POSITION_FLOATS: usize = 3;

/// Failure of one brush slot.
pub type SlotError = (usize, BrushError);

/// Schema indices of the X/Y/Z fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PositionIndices {
  pub x: usize,
  pub y: usize,
  pub z: usize,
}

/// Prepare every active brush concurrently and wait for all of them.
///
/// When any brush fails, the ones that did prepare are unprepared again
/// before the first failure (lowest slot) is returned.
#[cfg_attr(feature = "tracing-spans", tracing::instrument(skip_all, name = "cache::prepare_brushes"))]
pub fn prepare_brushes(
  brushes: &mut [BrushSlot],
  params: &BufferParams,
  contexts: &[StagingContext<'_>],
) -> Result<(), SlotError> {
  let results: Vec<Option<Result<(), BrushError>>> = brushes
    .par_iter_mut()
    .zip(contexts.par_iter())
    .map(|(slot, ctx)| slot.as_mut().map(|brush| brush.prepare(params, ctx)))
    .collect();

  let Some(failure) = results
    .iter()
    .enumerate()
    .find_map(|(slot, r)| match r {
      Some(Err(e)) => Some((slot, e.clone())),
      _ => None,
    })
  else {
    return Ok(());
  };

  // Roll back the brushes that did prepare
  brushes
    .par_iter_mut()
    .zip(results.par_iter())
    .enumerate()
    .for_each(|(slot, (brush, result))| {
      if let (Some(brush), Some(Ok(()))) = (brush.as_mut(), result) {
        if let Err(e) = brush.unprepare(params) {
          warn!(slot, path = %params.tree_path, error = %e, "unprepare after failed prepare");
        }
      }
    });
  Err(failure)
}

/// Unprepare every active brush concurrently; all run even if one fails.
#[cfg_attr(feature = "tracing-spans", tracing::instrument(skip_all, name = "cache::unprepare_brushes"))]
pub fn unprepare_brushes(brushes: &mut [BrushSlot], params: &BufferParams) -> Result<(), SlotError> {
  let results: Vec<Option<Result<(), BrushError>>> = brushes
    .par_iter_mut()
    .map(|slot| slot.as_mut().map(|brush| brush.unprepare(params)))
    .collect();
  match results.into_iter().enumerate().find_map(|(slot, r)| match r {
    Some(Err(e)) => Some((slot, e)),
    _ => None,
  }) {
    Some(failure) => Err(failure),
    None => Ok(()),
  }
}

/// Color every point of a prepared buffer.
///
/// Output layout per point: `x, y, z` then one packed color per brush slot.
/// Empty slots stay zero. Points are processed in chunks of `chunk_points`
/// on rayon; each point depends only on its own record, so the chunk size
/// never changes the result.
#[cfg_attr(feature = "tracing-spans", tracing::instrument(skip_all, name = "cache::color_buffer"))]
pub fn color_buffer(
  params: &BufferParams,
  brushes: &[BrushSlot],
  position: PositionIndices,
  chunk_points: usize,
) -> Result<ColoredBuffer, SlotError> {
  let in_stride = params.schema.stride();
  let out_stride = POSITION_FLOATS + brushes.len();
  let point_count = params.point_count();
  let chunk_points = chunk_points.max(1);
  let mut out = vec![0.0f32; point_count * out_stride];

  out
    .par_chunks_mut(chunk_points * out_stride)
    .enumerate()
    .try_for_each(|(chunk, dst_chunk)| {
      let first = chunk * chunk_points;
      for (offset, dst) in dst_chunk.chunks_exact_mut(out_stride).enumerate() {
        let start = (first + offset) * in_stride;
        let src = &params.data[start..start + in_stride];
        color_point_into(params, brushes, position, src, dst)?;
      }
      Ok(())
    })?;

  Ok(ColoredBuffer {
    data: out.into(),
    stride: out_stride,
    point_count,
  })
}

#[inline]
fn color_point_into(
  params: &BufferParams,
  brushes: &[BrushSlot],
  position: PositionIndices,
  src: &[f32],
  dst: &mut [f32],
) -> Result<(), SlotError> {
  dst[0] = src[position.x];
  dst[1] = src[position.y];
  dst[2] = src[position.z];
  let point = Point::new(&params.schema, src);
  for (slot, brush) in brushes.iter().enumerate() {
    if let Some(brush) = brush {
      let mut rgb = [0.0f32; 3];
      brush.color_point(&mut rgb, &point).map_err(|e| (slot, e))?;
      dst[POSITION_FLOATS + slot] = compress_color(rgb);
    }
  }
  Ok(())
}

#[cfg(test)]
#[path = "coloring_test.rs"]
mod coloring_test;
