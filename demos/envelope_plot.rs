use std::error::Error;

use gnuplot::*;
use train_envelope::{
    max_effort_envelope, max_speed_envelope, mrsp, Allowance, AllowanceValue, Envelope,
    EnvelopeSimContext, EnvelopeSimPath, SimpleRollingStock, SpeedSection,
};

fn speed_curve(envelope: &Envelope) -> (Vec<f64>, Vec<f64>) {
    envelope
        .iterate_points()
        .into_iter()
        .map(|point| (point.position / 1000.0, point.speed * 3.6))
        .unzip()
}

fn main() -> Result<(), Box<dyn Error>> {
    // -----------------------
    // 1. Train and track
    // -----------------------
    let rolling_stock = SimpleRollingStock::standard_train();
    // a descent in the middle, then a climb
    let path = EnvelopeSimPath::new(
        20_000.0,
        vec![0.0, 6000.0, 9000.0, 14_000.0, 20_000.0],
        vec![0.0, -8.0, 0.0, 5.0],
    )?;
    let context = EnvelopeSimContext::new(&rolling_stock, &path, 2.0)?;

    let sections = [
        SpeedSection { begin: 0.0, end: 8000.0, speed: 160.0 / 3.6 },
        SpeedSection { begin: 8000.0, end: 12_000.0, speed: 100.0 / 3.6 },
        SpeedSection { begin: 12_000.0, end: 20_000.0, speed: 140.0 / 3.6 },
    ];
    let stops = [11_000.0, 20_000.0];

    // ----------------------
    // 2. Base envelopes
    // ----------------------
    let limits = mrsp(&sections, &rolling_stock)?;
    let max_speed = max_speed_envelope(&context, &limits, &stops)?;
    let max_effort = max_effort_envelope(&context, &max_speed, 0.0)?;

    // -------------------------
    // 3. Allowances
    // -------------------------
    let value = AllowanceValue::Percentage { percentage: 10.0 };
    let mareco = Allowance::mareco(0.0, 20_000.0, value)?.apply(&max_effort, &context)?;
    let linear = Allowance::linear(0.0, 20_000.0, value)?.apply(&max_effort, &context)?;

    println!("max effort: {:.1} s", max_effort.total_time());
    println!("mareco:     {:.1} s", mareco.total_time());
    println!("linear:     {:.1} s", linear.total_time());

    // --------------
    // 4. Plot
    // --------------
    let mut fg = Figure::new();
    {
        let axes = fg.axes2d();
        axes.set_title("Speed envelopes", &[]);
        axes.set_x_label("Position (km)", &[]);
        axes.set_y_label("Speed (km/h)", &[]);
        let (x, y) = speed_curve(&max_speed);
        axes.lines(&x, &y, &[Color("gray"), Caption("Max speed")]);
        let (x, y) = speed_curve(&max_effort);
        axes.lines(&x, &y, &[Color("blue"), Caption("Max effort")]);
        let (x, y) = speed_curve(&mareco);
        axes.lines(&x, &y, &[Color("green"), Caption("MARECO 10%")]);
        let (x, y) = speed_curve(&linear);
        axes.lines(&x, &y, &[Color("red"), Caption("Linear 10%")]);
    }

    // Attempt to show in a pop-up window (might require gnuplot installed)
    fg.show().map_err(|e| format!("Failed to display plot: {e}"))?;
    Ok(())
}
