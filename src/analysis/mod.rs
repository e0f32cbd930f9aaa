// Second stage: body angles from the persisted skeletons, then tail-beat summaries.

pub mod angle;
pub mod oscillation;
pub mod spline;
pub mod treater;
