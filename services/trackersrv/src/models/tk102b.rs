//! TK102B: configured by SMS with a per-device password, reports over SMS
//! or GPRS

use super::*;
use crate::geo::{mnc_for_operator, parse_nmea_coordinate};
use crate::notify::{
    NOTIFY_AVAILABLE, NOTIFY_LOW_BATTERY, NOTIFY_MOVE_OUT, NOTIFY_OVER_SPEED, NOTIFY_SHOCK,
    NOTIFY_STATUS_CHECK, TRACKER_SOS,
};
use crate::tcp::FrameKind;
use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

pub const DEFAULT_ADMIN_IP: &str = "187.4.165.10 5001";
pub const DEFAULT_ADMIN_PHONE: &str = "67998035423";

/// Fields in a full GPRS position report
const REPORT_FIELDS: usize = 11;

#[derive(Debug, Default)]
pub struct Tk102b;

impl Tk102b {
    fn command(&self, profile: &DeviceProfile, config: &Configuration) -> CommandPlan {
        let pw = profile.password.as_str();
        let on = config.enabled;
        let value = config.value_or("");
        let text = match config.name.as_str() {
            BEGIN => format!("begin{}", pw),
            TIME_ZONE => format!("time zone{} 0", pw),
            STATUS_CHECK => format!("check{}", pw),
            IMEI => format!("imei{}", pw),
            RESET => format!("reset{}", pw),
            ACCESS_POINT => format!("apn{} {}", pw, value),
            APN_USER_PASS => format!("up{} {}", pw, value),
            ADMIN_IP => format!("adminip{} {}", pw, config.value_or(DEFAULT_ADMIN_IP)),
            GPRS | SMS if !on => {
                return CommandPlan::ConfirmLocally {
                    name: config.name.clone(),
                    enabled: false,
                }
            },
            GPRS => format!("gprs{}", pw),
            SMS => format!("sms{}", pw),
            LESS_GPRS => format!("less gprs{} {}", pw, if on { "on" } else { "off" }),
            ADMIN => format!(
                "{}admin{} {}",
                if on { "" } else { "no" },
                pw,
                config.value_or(DEFAULT_ADMIN_PHONE)
            ),
            PERIODIC_UPDATE if on => format!("{}{}", value, pw),
            PERIODIC_UPDATE => format!("nofix{}", pw),
            SLEEP if on => format!("sleep{} {}", pw, value),
            SLEEP => format!("sleep{} off", pw),
            SCHEDULE if on => format!("schedule{} {}", pw, value),
            SCHEDULE => format!("noschedule{}", pw),
            MOVE if on => format!("move{} {}", pw, value),
            MOVE => format!("nomove{}", pw),
            SPEED if on => format!("speed{} {}", pw, value),
            SPEED => format!("nospeed{}", pw),
            SHOCK if on => format!("shock{}", pw),
            SHOCK => format!("noshock{}", pw),
            other => format!("{} {}", other, value).trim().to_string(),
        };
        CommandPlan::Transmit(PlannedCommand::single(&config.name, text))
    }

    fn classify_sms(&self, profile: &DeviceProfile, raw: &str) -> Vec<DeviceAction> {
        let text = raw.replace('\0', "").trim().to_lowercase();
        let confirm = |name: &str, enabled: bool| vec![DeviceAction::confirm(name, enabled, &text)];
        let name = profile.display_name();

        // order matters: "sleep off" before "sleep ", "noadmin " excludes "admin "
        if text.starts_with("begin ") {
            confirm(BEGIN, true)
        } else if text.starts_with("time ") {
            confirm(TIME_ZONE, true)
        } else if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) {
            let mut fields = Map::new();
            fields.insert("imei".to_string(), Value::String(text.clone()));
            vec![
                DeviceAction::UpdateProfile(fields),
                DeviceAction::confirm(IMEI, true, &text),
            ]
        } else if text.starts_with("reset ") {
            confirm(RESET, true)
        } else if text.starts_with("apn ") {
            confirm(ACCESS_POINT, true)
        } else if text.starts_with("user") {
            confirm(APN_USER_PASS, true)
        } else if text.starts_with("adminip ") {
            confirm(ADMIN_IP, true)
        } else if text.starts_with("gprs ") {
            confirm(GPRS, true)
        } else if text.starts_with("less gprs on ") {
            confirm(LESS_GPRS, true)
        } else if text.starts_with("less gprs off ") {
            confirm(LESS_GPRS, false)
        } else if text.starts_with("sms ") {
            confirm(SMS, true)
        } else if text.starts_with("admin ") {
            confirm(ADMIN, true)
        } else if text.starts_with("noadmin ") {
            confirm(ADMIN, false)
        } else if text.contains("phone number is not") {
            vec![DeviceAction::confirm(ADMIN, false, "ok")]
        } else if text.starts_with("sleep off") {
            confirm(SLEEP, false)
        } else if text.starts_with("sleep ") {
            confirm(SLEEP, true)
        } else if text.starts_with("noschework ") {
            confirm(SCHEDULE, false)
        } else if text.starts_with("schework ") {
            confirm(SCHEDULE, true)
        } else if text.starts_with("nofix") {
            confirm(PERIODIC_UPDATE, false)
        } else if text.starts_with("noshock ") {
            confirm(SHOCK, false)
        } else if text.starts_with("shock ") {
            confirm(SHOCK, true)
        } else if text.starts_with("nomove ") {
            confirm(MOVE, false)
        } else if text.starts_with("move ") {
            confirm(MOVE, true)
        } else if text.starts_with("nospeed ") {
            confirm(SPEED, false)
        } else if text.starts_with("speed ") {
            confirm(SPEED, true)
        } else if text.contains("password err") {
            confirm(BEGIN, true)
        } else if text.contains("help me! ok!") {
            info!("Successfully disabled SOS alert from tracker {}", name);
            Vec::new()
        } else if text.contains("low battery! ok!") {
            info!("Successfully disabled low battery alert from tracker {}", name);
            Vec::new()
        } else if text.starts_with("bat: ") {
            status_report(&text)
        } else if text.starts_with("lac:") {
            match cell_report(profile, &text) {
                Some(action) => vec![action],
                None => {
                    warn!("Unable to parse cell report from {}: {}", name, text);
                    Vec::new()
                },
            }
        } else if text.contains("lat") {
            match gps_report(&text) {
                Some(fix) => {
                    let mut actions = vec![DeviceAction::Locate {
                        fix,
                        confirm: vec![PERIODIC_UPDATE.to_string()],
                    }];
                    actions.extend(alert_followup(profile, alert_segment(&text)));
                    actions
                },
                None => {
                    warn!("Unable to parse position from {}: {}", name, text);
                    Vec::new()
                },
            }
        } else {
            warn!("Unable to parse message from TK102B model: {}", text);
            Vec::new()
        }
    }

    fn classify_tcp(&self, profile: &DeviceProfile, event: &TcpEvent) -> Vec<DeviceAction> {
        match event.kind {
            FrameKind::Connection => vec![
                DeviceAction::notify(
                    NOTIFY_AVAILABLE,
                    Notification::new("Conexão GPRS", "Rastreador conectado")
                        .expanded("O rastreador se conectou ao servidor"),
                ),
                DeviceAction::Reply("LOAD".to_string()),
            ],
            FrameKind::Heartbeat => vec![DeviceAction::Reply("ON".to_string())],
            FrameKind::Report if event.fields.len() >= REPORT_FIELDS => {
                let Some(fix) = tcp_report(profile, &event.fields) else {
                    warn!("Unable to parse TK102B report: {}", event.raw);
                    return Vec::new();
                };
                let keyword = fix.alert_text.clone();
                let mut actions = vec![
                    DeviceAction::Locate {
                        fix,
                        confirm: Vec::new(),
                    },
                    DeviceAction::confirm(LOCATION, true, "ok"),
                    DeviceAction::confirm(PERIODIC_UPDATE, true, "ok"),
                ];
                actions.extend(alert_followup(profile, &keyword));
                actions
            },
            _ => {
                warn!("Unknown TK102B frame: {}", event.raw);
                Vec::new()
            },
        }
    }
}

impl DeviceModel for Tk102b {
    fn kind(&self) -> ModelKind {
        ModelKind::Tk102b
    }

    fn channel(&self) -> Channel {
        Channel::Sms
    }

    fn plan_command(
        &self,
        profile: &DeviceProfile,
        pending: &[&Configuration],
        _all: &[Configuration],
    ) -> Option<CommandPlan> {
        let config = pending.first()?;
        Some(self.command(profile, config))
    }

    fn classify_response(
        &self,
        profile: &DeviceProfile,
        input: DeviceInput<'_>,
    ) -> Vec<DeviceAction> {
        match input {
            DeviceInput::Sms(text) => self.classify_sms(profile, text),
            DeviceInput::Tcp(event) => self.classify_tcp(profile, event),
        }
    }

    fn coordinate_override(&self, alert_text: &str) -> Option<NotificationOverride> {
        let text = alert_text.to_lowercase();
        let head = alert_segment(&text);
        let alert = if head.contains("move") {
            (NOTIFY_MOVE_OUT, "Alerta de evasão", "Movimentação além do limite determinado.")
        } else if head.contains("speed") {
            (NOTIFY_OVER_SPEED, "Alerta de velocidade", "Velocidade acima do limite determinado.")
        } else if head.contains("shock") {
            (NOTIFY_SHOCK, "Alerta de vibração", "Vibração detectada pelo dispositivo.")
        } else if head.contains("help me") {
            (TRACKER_SOS, "Alerta de emergência (SOS)", "Botão de SOS pressionado no dispositivo")
        } else if head.contains("low battery") {
            (NOTIFY_LOW_BATTERY, "Alerta de bateria fraca", "Nível de bateria abaixo do ideal")
        } else {
            return None;
        };
        Some(NotificationOverride::new(alert.0, alert.1, alert.2))
    }
}

/// Part of a message before its coordinates; alert words live there
fn alert_segment(text: &str) -> &str {
    text.split("lat:").next().unwrap_or_default()
}

/// Command that silences a latched alarm
fn alert_followup(profile: &DeviceProfile, head: &str) -> Option<DeviceAction> {
    let head = head.to_lowercase();
    if head.contains("help me") {
        debug!("Disabling SOS alert of {}", profile.display_name());
        Some(DeviceAction::SendSms("help me".to_string()))
    } else if head.contains("low battery") {
        debug!("Disabling low battery alert of {}", profile.display_name());
        Some(DeviceAction::SendSms(format!("low battery{}", profile.password)))
    } else {
        None
    }
}

/// Value after `key`, up to the next whitespace
fn field_after<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    let start = text.find(key)? + key.len();
    let rest = &text[start..];
    let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
    Some(&rest[..end]).filter(|value| !value.is_empty())
}

/// Value after `key`, up to the end of its line
fn line_after<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    let start = text.find(key)? + key.len();
    let rest = &text[start..];
    let end = rest.find('\n').unwrap_or(rest.len());
    Some(rest[..end].trim()).filter(|value| !value.is_empty())
}

// bat: 100%
// gsm: 24
// gps: 8
fn status_report(text: &str) -> Vec<DeviceAction> {
    let battery = line_after(text, "bat: ").unwrap_or("N/D").to_string();
    let signal = line_after(text, "gsm: ")
        .and_then(|gsm| gsm.parse::<f64>().ok())
        .map(|gsm| format!("{:.0}%", gsm * 10.0 / 3.0))
        .unwrap_or_else(|| "N/D".to_string());

    let mut fields = Map::new();
    fields.insert("batteryLevel".to_string(), Value::String(battery.clone()));
    fields.insert("signalLevel".to_string(), Value::String(signal.clone()));
    vec![
        DeviceAction::UpdateProfile(fields),
        DeviceAction::notify(
            NOTIFY_STATUS_CHECK,
            Notification::new(
                "Atualização de status",
                format!("Bateria: {} / Sinal GSM: {}", battery, signal),
            ),
        ),
        DeviceAction::confirm(STATUS_CHECK, true, text),
    ]
}

// lac:2a3b 1f2e
fn cell_report(profile: &DeviceProfile, text: &str) -> Option<DeviceAction> {
    let rest = text.strip_prefix("lac:")?;
    let (lac, rest) = rest.split_once(' ')?;
    let cid = rest.lines().next()?.trim();
    let fix = Fix {
        position: Position::Cell {
            mnc: profile
                .network
                .as_deref()
                .and_then(mnc_for_operator)
                .unwrap_or_default(),
            lac: u32::from_str_radix(lac.trim(), 16).ok()?,
            cid: u32::from_str_radix(cid, 16).ok()?,
        },
        source: FixSource::Gsm,
        datetime: Utc::now(),
        speed: None,
        battery: profile.battery_level.clone(),
        alert_text: text.to_string(),
    };
    Some(DeviceAction::Locate {
        fix,
        confirm: vec![PERIODIC_UPDATE.to_string()],
    })
}

// lat:-20.469722 long:-54.620121 speed:0.00 t:24/01/05 12:30 bat:f:4.1v
fn gps_report(text: &str) -> Option<Fix> {
    let latitude: f64 = field_after(text, "lat:")?.parse().ok()?;
    let longitude: f64 = field_after(text, "long:")?.parse().ok()?;
    Some(Fix {
        position: Position::Point(GeoPoint::new(latitude, longitude)),
        source: FixSource::Gps,
        datetime: Utc::now(),
        speed: field_after(text, "speed:").map(str::to_string),
        battery: line_after(text, "bat:").map(str::to_string),
        alert_text: text.to_string(),
    })
}

// imei:359586015829802,tracker,0809231929,,F,112909.397,A,2234.4669,N,11354.3287,E,0.11,
fn tcp_report(profile: &DeviceProfile, fields: &[String]) -> Option<Fix> {
    let keyword = fields[1].clone();
    let speed = fields.get(11).filter(|s| !s.is_empty()).cloned();
    if fields[4] == "F" {
        let latitude = parse_nmea_coordinate(&fields[7], &fields[8])?;
        let longitude = parse_nmea_coordinate(&fields[9], &fields[10])?;
        Some(Fix {
            position: Position::Point(GeoPoint::new(latitude, longitude)),
            source: FixSource::Gps,
            datetime: report_datetime(&fields[2], &fields[5]).unwrap_or_else(Utc::now),
            speed,
            battery: None,
            alert_text: keyword,
        })
    } else {
        Some(Fix {
            position: Position::Cell {
                mnc: profile
                    .network
                    .as_deref()
                    .and_then(mnc_for_operator)
                    .unwrap_or_default(),
                lac: u32::from_str_radix(fields[7].trim(), 16).ok()?,
                cid: u32::from_str_radix(fields[9].trim(), 16).ok()?,
            },
            source: FixSource::Gsm,
            datetime: Utc::now(),
            speed,
            battery: None,
            alert_text: keyword,
        })
    }
}

/// Date from the local stamp (`yymmdd...`) and time from the UTC fix (`hhmmss.sss`)
fn report_datetime(stamp: &str, time: &str) -> Option<DateTime<Utc>> {
    let joined = format!("{}{}", stamp.get(..6)?, time.get(..6)?);
    NaiveDateTime::parse_from_str(&joined, "%y%m%d%H%M%S")
        .ok()
        .map(|naive| naive.and_utc())
}
