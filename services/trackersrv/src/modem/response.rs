//! Parsing of AT response and notification lines

use serde::Serialize;

/// Split `+TAG: a,"b,c",d` into `["a", "b,c", "d"]`
///
/// Everything up to the first `:` is dropped, commas inside quotes are kept
/// and quotes are removed.
pub fn parse_response(line: &str) -> Vec<String> {
    let plain = match line.find(':') {
        Some(pos) => &line[pos + 1..],
        None => line,
    }
    .trim();

    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in plain.chars() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    fields.push(current);
    fields.into_iter().map(|f| f.trim().to_string()).collect()
}

/// Storage usage from an `AT+CPMS` response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryUsage {
    pub used: u32,
    pub total: u32,
}

impl MemoryUsage {
    pub fn parse(line: &str) -> Option<Self> {
        let fields = parse_response(line);
        let used = fields.first()?.parse().ok()?;
        let total = fields.get(1)?.parse().ok()?;
        Some(Self { used, total })
    }

    pub fn is_full(&self) -> bool {
        self.total > 0 && self.used >= self.total
    }
}

/// Store slot announced by `+CMTI` / `+CDSI`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSlot {
    pub memory: String,
    pub index: u32,
}

impl StoreSlot {
    pub fn parse(line: &str) -> Option<Self> {
        let fields = parse_response(line);
        let memory = fields.first()?.clone();
        let index = fields.get(1)?.parse().ok()?;
        Some(Self { memory, index })
    }
}

/// Index from a `+CMGL: <index>,<stat>,,<len>` listing header
pub fn listing_index(line: &str) -> Option<u32> {
    line.strip_prefix("+CMGL:")?
        .split(',')
        .next()?
        .trim()
        .parse()
        .ok()
}

/// Modem status decoded from `^SYSINFO`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SysInfo {
    pub service: &'static str,
    pub registered: bool,
    pub domain: &'static str,
    pub roaming: &'static str,
    pub mode: &'static str,
    pub sim_card: &'static str,
    pub sim_lock: &'static str,
    pub network: &'static str,
}

impl SysInfo {
    pub fn parse(line: &str) -> Self {
        let fields = parse_response(line);
        let field = |i: usize| fields.get(i).map(String::as_str).unwrap_or("");

        let (service, registered) = match field(0) {
            "0" => ("NO SERVICE", false),
            "1" => ("RESTRICTED SERVICES", false),
            "2" => ("REGISTERED", true),
            _ => ("UNKNOWN", false),
        };
        let domain = match field(1) {
            "0" => "NO SERVICE",
            "1" => "CS ONLY",
            "2" => "PS ONLY",
            "3" => "CS+PS SERVICES",
            "4" => "NOT REGISTERED, SEARCHING...",
            _ => "UNKNOWN",
        };
        let roaming = if field(2) == "0" {
            "NOT ROAMING"
        } else {
            "ROAMING"
        };
        let mode = match field(3) {
            "0" => "NO SERVICE",
            "3" => "GSM/GPRS MODE",
            "5" => "WCDMA MODE",
            "7" => "GSM/WCDMA MODE",
            _ => "UNKNOWN",
        };
        let sim_card = match field(4) {
            "0" => "INVALID SIM CARD",
            "1" => "VALID SIM CARD",
            "2" => "INVALID SIM CARD IN CS",
            "3" => "INVALID SIM CARD IN PS",
            "4" => "INVALID SIM CARD IN CS AND PS",
            "240" => "ROM SIM VERSION",
            "255" => "NO SIM CARD FOUND",
            _ => "UNKNOWN",
        };
        let sim_lock = if field(5) == "0" {
            "SIM NOT LOCKED"
        } else {
            "SIM CARD LOCKED"
        };
        let network = match field(6) {
            "0" => "NO SERVICE",
            "1" => "GSM MODE",
            "2" => "GPRS MODE",
            "3" => "EDGE MODE",
            "4" => "WCDMA MODE",
            "5" => "HSDPA MODE",
            "6" => "HSUPA MODE",
            "7" => "HSDPA/HSUPA MODE",
            _ => "UNKNOWN",
        };

        Self {
            service,
            registered,
            domain,
            roaming,
            mode,
            sim_card,
            sim_lock,
            network,
        }
    }
}

/// Strip `+`, the country code and a leading `0`
pub fn normalize_phone(number: &str, country_code: &str) -> String {
    let number = number.trim().trim_start_matches('+');
    let number = if country_code.is_empty() {
        number
    } else {
        number.strip_prefix(country_code).unwrap_or(number)
    };
    number.strip_prefix('0').unwrap_or(number).to_string()
}

/// Own number from `+CNUM: "","5567998035423",145`
pub fn own_number(lines: &[String], country_code: &str) -> Option<String> {
    lines
        .iter()
        .filter(|line| line.starts_with("+CNUM"))
        .filter_map(|line| parse_response(line).into_iter().nth(1))
        .map(|number| normalize_phone(&number, country_code))
        .find(|number| !number.is_empty())
}
