//! State FIPS code lookups used for congressional district names and labels

/// (FIPS code, state name, postal abbreviation)
const STATES: &[(&str, &str, &str)] = &[
    ("01", "Alabama", "AL"),
    ("02", "Alaska", "AK"),
    ("04", "Arizona", "AZ"),
    ("05", "Arkansas", "AR"),
    ("06", "California", "CA"),
    ("08", "Colorado", "CO"),
    ("09", "Connecticut", "CT"),
    ("10", "Delaware", "DE"),
    ("11", "District of Columbia", "DC"),
    ("12", "Florida", "FL"),
    ("13", "Georgia", "GA"),
    ("15", "Hawaii", "HI"),
    ("16", "Idaho", "ID"),
    ("17", "Illinois", "IL"),
    ("18", "Indiana", "IN"),
    ("19", "Iowa", "IA"),
    ("20", "Kansas", "KS"),
    ("21", "Kentucky", "KY"),
    ("22", "Louisiana", "LA"),
    ("23", "Maine", "ME"),
    ("24", "Maryland", "MD"),
    ("25", "Massachusetts", "MA"),
    ("26", "Michigan", "MI"),
    ("27", "Minnesota", "MN"),
    ("28", "Mississippi", "MS"),
    ("29", "Missouri", "MO"),
    ("30", "Montana", "MT"),
    ("31", "Nebraska", "NE"),
    ("32", "Nevada", "NV"),
    ("33", "New Hampshire", "NH"),
    ("34", "New Jersey", "NJ"),
    ("35", "New Mexico", "NM"),
    ("36", "New York", "NY"),
    ("37", "North Carolina", "NC"),
    ("38", "North Dakota", "ND"),
    ("39", "Ohio", "OH"),
    ("40", "Oklahoma", "OK"),
    ("41", "Oregon", "OR"),
    ("42", "Pennsylvania", "PA"),
    ("44", "Rhode Island", "RI"),
    ("45", "South Carolina", "SC"),
    ("46", "South Dakota", "SD"),
    ("47", "Tennessee", "TN"),
    ("48", "Texas", "TX"),
    ("49", "Utah", "UT"),
    ("50", "Vermont", "VT"),
    ("51", "Virginia", "VA"),
    ("53", "Washington", "WA"),
    ("54", "West Virginia", "WV"),
    ("55", "Wisconsin", "WI"),
    ("56", "Wyoming", "WY"),
    ("60", "American Samoa", "AS"),
    ("66", "Guam", "GU"),
    ("69", "Northern Mariana Islands", "MP"),
    ("72", "Puerto Rico", "PR"),
    ("78", "Virgin Islands", "VI"),
];

pub fn state_name(fips: &str) -> Option<&'static str> {
    STATES.iter().find(|(code, _, _)| *code == fips).map(|(_, name, _)| *name)
}

pub fn state_abbrev(fips: &str) -> Option<&'static str> {
    STATES.iter().find(|(code, _, _)| *code == fips).map(|(_, _, abbrev)| *abbrev)
}

/// Split a congressional district GEOID ("3621") into state FIPS and district number.
pub fn split_district_geoid(geoid: &str) -> Option<(&str, &str)> {
    if geoid.len() < 3 || !geoid.is_char_boundary(2) {
        return None;
    }
    Some(geoid.split_at(2))
}

/// Map label for a district, e.g. "NY21"
pub fn district_label(geoid: &str) -> Option<String> {
    let (state, district) = split_district_geoid(geoid)?;
    Some(format!("{}{}", state_abbrev(state)?, district))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        assert_eq!(state_name("36"), Some("New York"));
        assert_eq!(state_abbrev("72"), Some("PR"));
        assert_eq!(state_name("99"), None);
    }

    #[test]
    fn test_district_geoid() {
        assert_eq!(split_district_geoid("3621"), Some(("36", "21")));
        assert_eq!(split_district_geoid("36"), None);
        assert_eq!(district_label("3621").as_deref(), Some("NY21"));
        assert_eq!(district_label("9901"), None);
    }
}
