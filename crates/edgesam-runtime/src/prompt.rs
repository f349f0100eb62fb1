use anyhow::Result;
use edgesam_core::{DType, Shape, Tensor};

/// Pixel position in the model input image.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned box given by its top-left corner and extent.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn top_left(&self) -> Point {
        Point::new(self.x, self.y)
    }

    pub fn bottom_right(&self) -> Point {
        Point::new(self.x + self.width, self.y + self.height)
    }
}

/// Sentinel labels understood by the mask decoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointLabel {
    Negative = 0,
    Positive = 1,
    BoxTopLeft = 2,
    BoxBottomRight = 3,
}

impl PointLabel {
    pub fn value(self) -> f32 {
        self as i32 as f32
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PromptSet {
    pub points: Vec<Point>,
    pub negative_points: Vec<Point>,
    pub roi: Option<Rect>,
}

impl PromptSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_point(mut self, point: Point) -> Self {
        self.points.push(point);
        self
    }

    pub fn with_negative_point(mut self, point: Point) -> Self {
        self.negative_points.push(point);
        self
    }

    pub fn with_box(mut self, roi: Rect) -> Self {
        self.roi = Some(roi);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty() && self.negative_points.is_empty() && self.roi.is_none()
    }

    pub fn encode(&self) -> EncodedPrompt {
        encode(&self.points, &self.negative_points, self.roi)
    }
}

/// Flat coordinate and label arrays in decoder order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EncodedPrompt {
    pub coords: Vec<Point>,
    pub labels: Vec<PointLabel>,
}

impl EncodedPrompt {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn label_values(&self) -> Vec<f32> {
        self.labels.iter().map(|l| l.value()).collect()
    }

    /// `point_coords` (`1 x N x 2`) and `point_labels` (`1 x N`) in the requested element types.
    pub fn to_tensors(&self, coords_dtype: DType, labels_dtype: DType) -> Result<(Tensor, Tensor)> {
        let n = self.len();
        let flat = self
            .coords
            .iter()
            .flat_map(|p| [p.x, p.y])
            .collect::<Vec<_>>();
        let coords = Tensor::from_f32_as(coords_dtype, Shape::from_slice(&[1, n, 2]), &flat)?;
        let labels = Tensor::from_f32_as(
            labels_dtype,
            Shape::from_slice(&[1, n]),
            &self.label_values(),
        )?;
        Ok((coords, labels))
    }
}

/// Positive points, then negative points, then the box corners.
///
/// A box always contributes two entries; degenerate boxes are passed through.
pub fn encode(points: &[Point], negative_points: &[Point], roi: Option<Rect>) -> EncodedPrompt {
    let capacity = points.len() + negative_points.len() + if roi.is_some() { 2 } else { 0 };
    let mut encoded = EncodedPrompt {
        coords: Vec::with_capacity(capacity),
        labels: Vec::with_capacity(capacity),
    };

    for point in points {
        encoded.coords.push(*point);
        encoded.labels.push(PointLabel::Positive);
    }
    for point in negative_points {
        encoded.coords.push(*point);
        encoded.labels.push(PointLabel::Negative);
    }
    if let Some(roi) = roi {
        encoded.coords.push(roi.top_left());
        encoded.labels.push(PointLabel::BoxTopLeft);
        encoded.coords.push(roi.bottom_right());
        encoded.labels.push(PointLabel::BoxBottomRight);
    }

    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_follow_concatenation_order() {
        let prompt = PromptSet::new()
            .with_point(Point::new(10.0, 20.0))
            .with_negative_point(Point::new(5.0, 5.0))
            .with_point(Point::new(30.0, 40.0))
            .with_box(Rect::new(1.0, 2.0, 100.0, 50.0));

        let encoded = prompt.encode();
        assert_eq!(encoded.label_values(), vec![1.0, 1.0, 0.0, 2.0, 3.0]);
        assert_eq!(
            encoded.coords,
            vec![
                Point::new(10.0, 20.0),
                Point::new(30.0, 40.0),
                Point::new(5.0, 5.0),
                Point::new(1.0, 2.0),
                Point::new(101.0, 52.0),
            ]
        );
    }

    #[test]
    fn empty_prompt_encodes_to_nothing() {
        let encoded = PromptSet::new().encode();
        assert!(encoded.is_empty());

        let (coords, labels) = encoded.to_tensors(DType::F32, DType::F32).unwrap();
        assert_eq!(coords.shape().dims(), &[1, 0, 2]);
        assert_eq!(labels.shape().dims(), &[1, 0]);
    }

    #[test]
    fn degenerate_box_is_kept() {
        let encoded = encode(&[], &[], Some(Rect::new(7.0, 7.0, 0.0, 0.0)));
        assert_eq!(encoded.labels, vec![PointLabel::BoxTopLeft, PointLabel::BoxBottomRight]);
        assert_eq!(encoded.coords, vec![Point::new(7.0, 7.0); 2]);
    }

    #[test]
    fn tensors_use_declared_dtypes() {
        let encoded = encode(&[Point::new(3.0, 4.0)], &[Point::new(1.0, 2.0)], None);
        let (coords, labels) = encoded.to_tensors(DType::F32, DType::I64).unwrap();

        assert_eq!(coords.shape().dims(), &[1, 2, 2]);
        assert_eq!(coords.to_f32_vec().unwrap(), vec![3.0, 4.0, 1.0, 2.0]);
        assert_eq!(labels.dtype(), DType::I64);
        assert_eq!(labels.to_i64_vec().unwrap(), vec![1, 0]);
    }
}
