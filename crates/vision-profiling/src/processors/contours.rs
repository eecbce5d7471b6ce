//! Connected-component extraction over binary mask planes.
//!
//! Components are found with 4-connectivity; each yields a [`Contour`] with
//! its pixel area, outer-boundary perimeter, and boundary points. Boundary
//! points feed the convex-hull helpers used by shape-statistics extractors.

use ndarray::ArrayView2;

use crate::batch::Contour;

/// Extract the connected components of one binary class plane.
///
/// `plane` holds 0/1 values (anything above 0.5 counts as foreground);
/// `class_id` is attached to every component found.
pub fn extract_components(plane: ArrayView2<'_, f32>, class_id: i64) -> Vec<Contour> {
    let (rows, cols) = plane.dim();
    let mut visited = vec![false; rows * cols];
    let mut components = Vec::new();

    let foreground = |r: usize, c: usize| plane[[r, c]] > 0.5;

    for start_r in 0..rows {
        for start_c in 0..cols {
            if visited[start_r * cols + start_c] || !foreground(start_r, start_c) {
                continue;
            }

            let mut area = 0usize;
            let mut perimeter = 0usize;
            let mut boundary = Vec::new();
            let mut queue = std::collections::VecDeque::new();

            visited[start_r * cols + start_c] = true;
            queue.push_back((start_r, start_c));

            while let Some((r, c)) = queue.pop_front() {
                area += 1;
                let mut exposed_edges = 0usize;

                let neighbors = [
                    (r.wrapping_sub(1), c),
                    (r + 1, c),
                    (r, c.wrapping_sub(1)),
                    (r, c + 1),
                ];
                for (nr, nc) in neighbors {
                    if nr >= rows || nc >= cols || !foreground(nr, nc) {
                        exposed_edges += 1;
                    } else if !visited[nr * cols + nc] {
                        visited[nr * cols + nc] = true;
                        queue.push_back((nr, nc));
                    }
                }

                if exposed_edges > 0 {
                    boundary.push((c as f64, r as f64));
                    perimeter += exposed_edges;
                }
            }

            components.push(Contour {
                class_id,
                points: boundary,
                area: area as f64,
                perimeter: perimeter as f64,
            });
        }
    }

    components
}

/// Convex hull of a point set (monotone chain), in counter-clockwise order.
pub fn convex_hull(points: &[(f64, f64)]) -> Vec<(f64, f64)> {
    if points.len() < 3 {
        return points.to_vec();
    }

    let mut sorted = points.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    sorted.dedup();
    if sorted.len() < 3 {
        return sorted;
    }

    let cross = |o: (f64, f64), a: (f64, f64), b: (f64, f64)| {
        (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
    };

    let mut hull: Vec<(f64, f64)> = Vec::with_capacity(sorted.len() * 2);
    for &p in sorted.iter().chain(sorted.iter().rev().skip(1)) {
        while hull.len() >= 2 && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(p);
    }
    hull.pop();
    hull
}

/// Perimeter of a closed polygon.
pub fn polygon_perimeter(points: &[(f64, f64)]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .take(points.len())
        .map(|(a, b)| ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt())
        .sum()
}
