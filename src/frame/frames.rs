use nalgebra::{IsometryMatrix3, Point3};

use super::Framed;

/// The sensor frame a scan is captured in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Body;

/// The odometry frame, anchored at the first registered scan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct World;

pub type BodyFramed<T> = Framed<T, Body>;
pub type WorldFramed<T> = Framed<T, World>;

pub type IsometryFramed<T, F> = Framed<IsometryMatrix3<T>, F>;

pub type BodyPoint<T> = BodyFramed<Point3<T>>;
pub type WorldPoint<T> = WorldFramed<Point3<T>>;

/// A pose read as the transform that brings body points into the world.
pub type BodyToWorld<T> = IsometryFramed<T, fn(Body) -> World>;
