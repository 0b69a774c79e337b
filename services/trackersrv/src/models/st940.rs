//! Suntech ST940: reachable only over GPRS, acknowledges commands by echoing
//! their name

use super::*;
use chrono::NaiveDateTime;
use tracing::{info, warn};

pub const DEFAULT_SPEED_LIMIT: &str = "0";

const PREFIX: &str = "AT^ST910";
const SET_ALERT: &str = "SETALERT";
const SET_REPORT: &str = "SETREPORT";
const REQUEST_LOCATION: &str = "REQLOC";
const RESET_COMMAND: &str = "RESET";

/// Configurations sent together in one `SETALERT` line, in field order
const ALERT_GROUP: [&str; 3] = [MOVE, SPEED, SHOCK];

#[derive(Debug, Default)]
pub struct St940;

impl St940 {
    fn alert_command(
        &self,
        profile: &DeviceProfile,
        pending: &[&Configuration],
        all: &[Configuration],
    ) -> PlannedCommand {
        let lookup = |name: &str| {
            pending
                .iter()
                .copied()
                .find(|c| c.name == name)
                .or_else(|| all.iter().find(|c| c.name == name))
        };
        let value = |name: &str| match lookup(name) {
            Some(c) if c.enabled && name == SHOCK => "1".to_string(),
            Some(c) if c.enabled => c.value_or(DEFAULT_SPEED_LIMIT).to_string(),
            _ => "0".to_string(),
        };
        let names = ALERT_GROUP
            .iter()
            .filter(|name| pending.iter().any(|c| c.name == **name))
            .map(|name| name.to_string())
            .collect();
        PlannedCommand {
            names,
            text: format!(
                "{};{};{};{};{};{}",
                PREFIX,
                SET_ALERT,
                profile.identification,
                value(MOVE),
                value(SPEED),
                value(SHOCK)
            ),
            tag: Some(SET_ALERT.to_string()),
        }
    }

    fn tagged(name: &str, tag: &str, text: String) -> PlannedCommand {
        PlannedCommand {
            names: vec![name.to_string()],
            text,
            tag: Some(tag.to_string()),
        }
    }

    fn report(&self, profile: &DeviceProfile, fields: &[String]) -> Vec<DeviceAction> {
        let Some(fix) = position_report(fields) else {
            warn!("Unable to parse ST940 report: {}", fields.join(";"));
            return Vec::new();
        };
        let mut actions = Vec::new();
        if let Some(battery) = &fix.battery {
            let mut update = Map::new();
            update.insert("batteryLevel".to_string(), Value::String(battery.clone()));
            update.insert("signalLevel".to_string(), Value::String("N/D".to_string()));
            actions.push(DeviceAction::UpdateProfile(update));
        }
        let emergency = fields[1] == "Emergency";
        let location = fields[1] == "Location";
        actions.push(DeviceAction::Locate {
            fix,
            confirm: if location {
                vec![LOCATION.to_string()]
            } else {
                Vec::new()
            },
        });
        if emergency {
            actions.push(DeviceAction::Reply(format!(
                "{};ACK;{}",
                PREFIX, profile.identification
            )));
        }
        actions
    }
}

impl DeviceModel for St940 {
    fn kind(&self) -> ModelKind {
        ModelKind::St940
    }

    fn channel(&self) -> Channel {
        Channel::Tcp
    }

    fn plan_command(
        &self,
        profile: &DeviceProfile,
        pending: &[&Configuration],
        all: &[Configuration],
    ) -> Option<CommandPlan> {
        let config = pending.first()?;
        let id = &profile.identification;
        let command = match config.name.as_str() {
            MOVE | SPEED | SHOCK => self.alert_command(profile, pending, all),
            PERIODIC_UPDATE => Self::tagged(
                PERIODIC_UPDATE,
                SET_REPORT,
                format!(
                    "{};{};{};{}",
                    PREFIX,
                    SET_REPORT,
                    id,
                    if config.enabled {
                        config.value_or("0")
                    } else {
                        "0"
                    }
                ),
            ),
            LOCATION => Self::tagged(
                LOCATION,
                REQUEST_LOCATION,
                format!("{};{};{}", PREFIX, REQUEST_LOCATION, id),
            ),
            RESET => Self::tagged(
                RESET,
                RESET_COMMAND,
                format!("{};{};{}", PREFIX, RESET_COMMAND, id),
            ),
            other => {
                let tag = other.to_ascii_uppercase();
                let text = format!("{};{};{};{}", PREFIX, tag, id, config.value_or(""));
                Self::tagged(other, &tag, text)
            },
        };
        Some(CommandPlan::Transmit(command))
    }

    fn classify_response(
        &self,
        profile: &DeviceProfile,
        input: DeviceInput<'_>,
    ) -> Vec<DeviceAction> {
        let DeviceInput::Tcp(event) = input else {
            warn!("ST940 {} does not talk SMS", profile.display_name());
            return Vec::new();
        };
        let fields = &event.fields;
        match fields.get(1).map(String::as_str) {
            Some("Emergency" | "Alert" | "Location") => self.report(profile, fields),
            Some("Alive") => {
                info!("Tracker ST940@{} connected.", event.identity);
                Vec::new()
            },
            Some("RES") => {
                info!("Tracker ST940@{} confirmed last command.", event.identity);
                match fields.get(3).filter(|tag| !tag.is_empty()) {
                    Some(tag) => vec![DeviceAction::ConfirmCommand { tag: tag.clone() }],
                    None => Vec::new(),
                }
            },
            _ => {
                warn!("Unknown data received from tracker {}", event.raw);
                Vec::new()
            },
        }
    }

    fn coordinate_override(&self, _alert_text: &str) -> Option<NotificationOverride> {
        None
    }
}

// ST910;Emergency;696478;500;20180201;12:26:55;-23.076226;-054.206427;000.367;000.00;1;4.1;...
fn position_report(fields: &[String]) -> Option<Fix> {
    let datetime = NaiveDateTime::parse_from_str(
        &format!("{} {}", fields.get(4)?, fields.get(5)?),
        "%Y%m%d %H:%M:%S",
    )
    .ok()?
    .and_utc();
    let latitude: f64 = fields.get(6)?.parse().ok()?;
    let longitude: f64 = fields.get(7)?.parse().ok()?;
    let battery = fields
        .get(11)
        .and_then(|volts| volts.parse::<f64>().ok())
        .map(|volts| format!("{:.0}%", (volts - 2.8) * 71.0));
    Some(Fix {
        position: Position::Point(GeoPoint::new(latitude, longitude)),
        source: FixSource::Gps,
        datetime,
        speed: fields.get(8).cloned(),
        battery,
        alert_text: fields[1].clone(),
    })
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::tcp::{classify, Classification};

    fn profile() -> DeviceProfile {
        DeviceProfile {
            name: "ST940 - ID(696478)".to_string(),
            model: "st940".to_string(),
            identification: "696478".to_string(),
            ..Default::default()
        }
    }

    fn event(frame: &str) -> TcpEvent {
        match classify(frame, 5) {
            Classification::Event(event) => event,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_alert_group_is_one_command() {
        let moves = Configuration::new(MOVE, true, Some("300"));
        let shock = Configuration::new(SHOCK, true, None);
        let mut speed = Configuration::new(SPEED, true, Some("80"));
        speed.status.step = crate::device::ConfigStep::Success;
        let all = vec![moves.clone(), speed, shock.clone()];

        let plan = St940
            .plan_command(&profile(), &[&moves, &shock], &all)
            .unwrap();
        let CommandPlan::Transmit(command) = plan else {
            panic!("expected transmission");
        };
        assert_eq!(command.text, "AT^ST910;SETALERT;696478;300;80;1");
        assert_eq!(command.names, vec![MOVE, SHOCK]);
        assert_eq!(command.tag.as_deref(), Some("SETALERT"));
    }

    #[test]
    fn test_single_commands() {
        let text = |config: Configuration| match St940.plan_command(&profile(), &[&config], &[]) {
            Some(CommandPlan::Transmit(command)) => command.text,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(
            text(Configuration::new(PERIODIC_UPDATE, true, Some("60"))),
            "AT^ST910;SETREPORT;696478;60"
        );
        assert_eq!(
            text(Configuration::new(LOCATION, true, None)),
            "AT^ST910;REQLOC;696478"
        );
        assert_eq!(
            text(Configuration::new("Odometer", true, Some("1000"))),
            "AT^ST910;ODOMETER;696478;1000"
        );
    }

    #[test]
    fn test_emergency_report() {
        let frame = event("ST910;Emergency;696478;500;20180201;12:26:55;-23.076226;-054.206427;000.367;000.00;1;4.1;0;1;02;1865;c57704f358;724;18;-397;1267;255;3;25");
        let actions = St940.classify_response(&profile(), DeviceInput::Tcp(&frame));
        let DeviceAction::UpdateProfile(update) = &actions[0] else {
            panic!("expected battery update");
        };
        assert_eq!(update["batteryLevel"], "92%");
        let DeviceAction::Locate { fix, .. } = &actions[1] else {
            panic!("expected fix");
        };
        assert_eq!(fix.datetime.to_rfc3339(), "2018-02-01T12:26:55+00:00");
        assert_eq!(
            fix.position,
            Position::Point(GeoPoint::new(-23.076226, -54.206427))
        );
        assert_eq!(
            actions[2],
            DeviceAction::Reply("AT^ST910;ACK;696478".to_string())
        );
    }

    #[test]
    fn test_acknowledgement() {
        let frame = event("ST910;RES;696478;SETALERT");
        assert_eq!(
            St940.classify_response(&profile(), DeviceInput::Tcp(&frame)),
            vec![DeviceAction::ConfirmCommand {
                tag: "SETALERT".to_string()
            }]
        );
        let alive = event("ST910;Alive;696478");
        assert!(St940
            .classify_response(&profile(), DeviceInput::Tcp(&alive))
            .is_empty());
    }
}
