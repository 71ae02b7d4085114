use serde::{Deserialize, Serialize};

use crate::physics::{GammaType, PhysicsRollingStock};

/// One point of the tractive effort curve.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TractiveEffortPoint {
    /// m/s
    pub speed: f64,
    /// N
    pub max_effort: f64,
}

/// A rolling stock with a Davis resistance law and a tabulated tractive effort curve.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimpleRollingStock {
    /// m
    pub length: f64,
    /// kg
    pub mass: f64,
    /// Rotating mass coefficient, usually slightly above 1
    pub inertia_coefficient: f64,
    /// Davis resistance coefficients: R(v) = a + b·v + c·v²
    pub a: f64,
    pub b: f64,
    pub c: f64,
    /// m/s
    pub max_speed: f64,
    /// Braking deceleration in m/s²
    pub gamma: f64,
    pub gamma_type: GammaType,
    /// Sorted by increasing speed
    pub tractive_effort_curve: Vec<TractiveEffortPoint>,
}

impl SimpleRollingStock {
    /// A 400 m long high speed train, used as a fixture and in demos.
    pub fn standard_train() -> Self {
        let curve = [
            (0.0, 450_000.0),
            (10.0, 450_000.0),
            (20.0, 440_000.0),
            (30.0, 293_000.0),
            (40.0, 220_000.0),
            (50.0, 176_000.0),
            (60.0, 146_000.0),
            (70.0, 125_000.0),
            (80.0, 110_000.0),
            (90.0, 97_000.0),
        ];
        Self {
            length: 400.0,
            mass: 900_000.0,
            inertia_coefficient: 1.05,
            a: 4400.0,
            b: 130.0,
            c: 8.0,
            max_speed: 300.0 / 3.6,
            gamma: 0.5,
            gamma_type: GammaType::Const,
            tractive_effort_curve: curve
                .iter()
                .map(|&(speed, max_effort)| TractiveEffortPoint { speed, max_effort })
                .collect(),
        }
    }
}

impl PhysicsRollingStock for SimpleRollingStock {
    fn mass(&self) -> f64 {
        self.mass
    }

    fn inertia(&self) -> f64 {
        self.mass * self.inertia_coefficient
    }

    fn length(&self) -> f64 {
        self.length
    }

    fn max_speed(&self) -> f64 {
        self.max_speed
    }

    fn rolling_resistance(&self, speed: f64) -> f64 {
        let speed = speed.abs();
        self.a + self.b * speed + self.c * speed * speed
    }

    fn rolling_resistance_deriv(&self, speed: f64) -> f64 {
        self.b + 2.0 * self.c * speed.abs()
    }

    /// Linear interpolation over the curve, constant past both ends.
    fn max_traction_force(&self, speed: f64) -> f64 {
        let curve = &self.tractive_effort_curve;
        let (first, last) = match (curve.first(), curve.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return 0.0,
        };
        if speed <= first.speed {
            return first.max_effort;
        }
        if speed >= last.speed {
            return last.max_effort;
        }
        let index = curve.partition_point(|point| point.speed <= speed);
        let (low, high) = (&curve[index - 1], &curve[index]);
        let ratio = (speed - low.speed) / (high.speed - low.speed);
        low.max_effort + ratio * (high.max_effort - low.max_effort)
    }

    fn max_braking_force(&self, _speed: f64) -> f64 {
        self.gamma * self.inertia()
    }

    fn deceleration(&self) -> f64 {
        self.gamma
    }

    fn gamma_type(&self) -> GammaType {
        self.gamma_type
    }
}
