use crate::error::SurvError;

/// The fixed region labels used as the hierarchical grouping key.
pub const REGION_LABELS: [&str; 6] = [
    "Africa",
    "Americas",
    "Asia",
    "Europe",
    "Middle East",
    "Oceania",
];

/// Total country → region lookup over a closed, hard-coded enumeration.
///
/// An unmapped country is an explicit error, never a silent default
/// category: a typo'd country name must surface before it becomes an
/// unlabeled group in the hierarchy.
pub fn assign_region(country: &str) -> Result<&'static str, SurvError> {
    region_of(country).ok_or_else(|| SurvError::UnmappedCountry(country.to_string()))
}

fn region_of(country: &str) -> Option<&'static str> {
    let region = match country {
        "Algeria" | "Angola" | "Botswana" | "Burkina Faso" | "Cameroon" | "Chad" | "Egypt"
        | "Ethiopia" | "Ghana" | "Kenya" | "Libya" | "Madagascar" | "Mali" | "Morocco"
        | "Mozambique" | "Namibia" | "Niger" | "Nigeria" | "Senegal" | "Somalia"
        | "South Africa" | "Sudan" | "Tanzania" | "Tunisia" | "Uganda" | "Zambia"
        | "Zimbabwe" => "Africa",

        "Argentina" | "Bolivia" | "Brazil" | "Canada" | "Chile" | "Colombia" | "Costa Rica"
        | "Cuba" | "Dominican Republic" | "Ecuador" | "Guatemala" | "Haiti" | "Honduras"
        | "Mexico" | "Nicaragua" | "Panama" | "Paraguay" | "Peru" | "United States"
        | "Uruguay" | "Venezuela" => "Americas",

        "Afghanistan" | "Bangladesh" | "Cambodia" | "China" | "India" | "Indonesia" | "Japan"
        | "Kazakhstan" | "Kyrgyzstan" | "Laos" | "Malaysia" | "Mongolia" | "Myanmar"
        | "Nepal" | "North Korea" | "Pakistan" | "Philippines" | "Singapore" | "South Korea"
        | "Sri Lanka" | "Tajikistan" | "Thailand" | "Turkmenistan" | "Uzbekistan"
        | "Vietnam" => "Asia",

        "Albania" | "Austria" | "Belarus" | "Belgium" | "Bulgaria" | "Croatia"
        | "Czech Republic" | "Denmark" | "Finland" | "France" | "Germany" | "Greece"
        | "Hungary" | "Ireland" | "Italy" | "Moldova" | "Netherlands" | "Norway" | "Poland"
        | "Portugal" | "Romania" | "Russia" | "Serbia" | "Slovakia" | "Spain" | "Sweden"
        | "Switzerland" | "Ukraine" | "United Kingdom" => "Europe",

        "Bahrain" | "Iran" | "Iraq" | "Israel" | "Jordan" | "Kuwait" | "Lebanon" | "Oman"
        | "Qatar" | "Saudi Arabia" | "Syria" | "Turkey" | "United Arab Emirates"
        | "Yemen" => "Middle East",

        "Australia" | "Fiji" | "New Zealand" | "Papua New Guinea" => "Oceania",

        _ => return None,
    };
    Some(region)
}
