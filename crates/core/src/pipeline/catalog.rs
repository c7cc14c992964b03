use crate::domain::{MarketRow, Session};
use crate::pipeline::trigger::{MetricSpec, Scale, TriggerDefinition};

const RATIO_CAP: f64 = 20.0;
const RETURN_CAP: f64 = 0.3;

fn volume_ratio(weight: f64) -> MetricSpec {
    MetricSpec {
        name: "volume_ratio",
        weight,
        scale: Scale::Linear { cap: RATIO_CAP },
        extract: |r| r.volume_ratio(),
    }
}

fn volume(weight: f64) -> MetricSpec {
    MetricSpec {
        name: "volume",
        weight,
        scale: Scale::Log,
        extract: |r| Some(r.current.volume),
    }
}

fn traded_value(weight: f64) -> MetricSpec {
    MetricSpec {
        name: "traded_value",
        weight,
        scale: Scale::Log,
        extract: |r| Some(r.traded_value()),
    }
}

fn change_rate(weight: f64) -> MetricSpec {
    MetricSpec {
        name: "change_rate",
        weight,
        scale: Scale::Linear { cap: RETURN_CAP },
        extract: |r| r.change_rate(),
    }
}

/// Volume at least doubled against the previous session.
pub fn volume_surge() -> TriggerDefinition {
    TriggerDefinition {
        name: "volume_surge",
        session: Session::Morning,
        predicate: |r| r.volume_ratio().is_some_and(|v| v >= 2.0),
        metrics: vec![volume_ratio(0.6), volume(0.4)],
        limit: 15,
        stop_loss_pct: 0.05,
    }
}

/// Opened at least 2% above the previous close.
pub fn gap_up() -> TriggerDefinition {
    TriggerDefinition {
        name: "gap_up",
        session: Session::Morning,
        predicate: |r| r.gap_ratio().is_some_and(|g| g >= 0.02),
        metrics: vec![
            MetricSpec {
                name: "gap_ratio",
                weight: 0.5,
                scale: Scale::Linear { cap: RETURN_CAP },
                extract: |r| r.gap_ratio(),
            },
            change_rate(0.3),
            traded_value(0.2),
        ],
        limit: 10,
        stop_loss_pct: 0.06,
    }
}

/// Traded value of at least 2% of market cap in one session.
pub fn turnover_spike() -> TriggerDefinition {
    TriggerDefinition {
        name: "turnover_spike",
        session: Session::Morning,
        predicate: |r| r.turnover().is_some_and(|t| t >= 0.02),
        metrics: vec![
            MetricSpec {
                name: "turnover",
                weight: 0.6,
                scale: Scale::Linear { cap: 1.0 },
                extract: |r| r.turnover(),
            },
            change_rate(0.4),
        ],
        limit: 10,
        stop_loss_pct: 0.07,
    }
}

/// Closed at least 3% above its own open.
pub fn intraday_rise() -> TriggerDefinition {
    TriggerDefinition {
        name: "intraday_rise",
        session: Session::Afternoon,
        predicate: |r| r.intraday_return().is_some_and(|x| x >= 0.03),
        metrics: vec![
            MetricSpec {
                name: "intraday_return",
                weight: 0.6,
                scale: Scale::Linear { cap: RETURN_CAP },
                extract: |r| r.intraday_return(),
            },
            traded_value(0.4),
        ],
        limit: 15,
        stop_loss_pct: 0.05,
    }
}

/// Up on the day and closed in the top fifth of the range.
pub fn closing_strength() -> TriggerDefinition {
    TriggerDefinition {
        name: "closing_strength",
        session: Session::Afternoon,
        predicate: |r| {
            r.change_rate().is_some_and(|c| c > 0.0)
                && r.closing_strength().is_some_and(|s| s >= 0.8)
        },
        metrics: vec![
            MetricSpec {
                name: "closing_strength",
                weight: 0.5,
                scale: Scale::Linear { cap: 1.0 },
                extract: |r| r.closing_strength(),
            },
            volume_ratio(0.3),
            change_rate(0.2),
        ],
        limit: 10,
        stop_loss_pct: 0.06,
    }
}

/// Flat price with rising volume.
pub fn quiet_accumulation() -> TriggerDefinition {
    TriggerDefinition {
        name: "quiet_accumulation",
        session: Session::Afternoon,
        predicate: is_quiet_accumulation,
        metrics: vec![volume_ratio(0.6), traded_value(0.4)],
        limit: 10,
        stop_loss_pct: 0.07,
    }
}

fn is_quiet_accumulation(r: &MarketRow<'_>) -> bool {
    r.change_rate().is_some_and(|c| c.abs() <= 0.02) && r.volume_ratio().is_some_and(|v| v >= 1.5)
}

pub fn all() -> Vec<TriggerDefinition> {
    vec![
        volume_surge(),
        gap_up(),
        turnover_spike(),
        intraday_rise(),
        closing_strength(),
        quiet_accumulation(),
    ]
}

pub fn for_session(session: Session) -> Vec<TriggerDefinition> {
    all().into_iter().filter(|t| t.session == session).collect()
}
