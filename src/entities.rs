use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Closed whitelist of sensitive-entity labels. Unknown labels
/// coming out of the LLM detector are dropped at the parser boundary —
/// this enum is the single source of truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Label {
    Name,
    Phone,
    Email,
    Address,
    PostalCode,
    ResidentId,
    Passport,
    DriverLicense,
    BusinessId,
    CardNumber,
    CardExpiry,
    CardCvv,
    BankAccount,
    PaymentPin,
    Mnemonic,
    CryptoPrivateKey,
    HdWallet,
    PaymentUriQr,
    Jwt,
    ApiKey,
    GithubPat,
    PrivateKey,
    Ipv4,
    Ipv6,
    MacAddress,
    Imei,
    ForeignerId,
    HealthInsuranceId,
    MilitaryId,
    MobilePaymentPin,
    PersonalCustomsId,
}

impl Label {
    pub const ALL: &'static [Label] = &[
        Label::Name,
        Label::Phone,
        Label::Email,
        Label::Address,
        Label::PostalCode,
        Label::ResidentId,
        Label::Passport,
        Label::DriverLicense,
        Label::BusinessId,
        Label::CardNumber,
        Label::CardExpiry,
        Label::CardCvv,
        Label::BankAccount,
        Label::PaymentPin,
        Label::Mnemonic,
        Label::CryptoPrivateKey,
        Label::HdWallet,
        Label::PaymentUriQr,
        Label::Jwt,
        Label::ApiKey,
        Label::GithubPat,
        Label::PrivateKey,
        Label::Ipv4,
        Label::Ipv6,
        Label::MacAddress,
        Label::Imei,
        Label::ForeignerId,
        Label::HealthInsuranceId,
        Label::MilitaryId,
        Label::MobilePaymentPin,
        Label::PersonalCustomsId,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Name => "NAME",
            Label::Phone => "PHONE",
            Label::Email => "EMAIL",
            Label::Address => "ADDRESS",
            Label::PostalCode => "POSTAL_CODE",
            Label::ResidentId => "RESIDENT_ID",
            Label::Passport => "PASSPORT",
            Label::DriverLicense => "DRIVER_LICENSE",
            Label::BusinessId => "BUSINESS_ID",
            Label::CardNumber => "CARD_NUMBER",
            Label::CardExpiry => "CARD_EXPIRY",
            Label::CardCvv => "CARD_CVV",
            Label::BankAccount => "BANK_ACCOUNT",
            Label::PaymentPin => "PAYMENT_PIN",
            Label::Mnemonic => "MNEMONIC",
            Label::CryptoPrivateKey => "CRYPTO_PRIVATE_KEY",
            Label::HdWallet => "HD_WALLET",
            Label::PaymentUriQr => "PAYMENT_URI_QR",
            Label::Jwt => "JWT",
            Label::ApiKey => "API_KEY",
            Label::GithubPat => "GITHUB_PAT",
            Label::PrivateKey => "PRIVATE_KEY",
            Label::Ipv4 => "IPV4",
            Label::Ipv6 => "IPV6",
            Label::MacAddress => "MAC_ADDRESS",
            Label::Imei => "IMEI",
            Label::ForeignerId => "FOREIGNER_ID",
            Label::HealthInsuranceId => "HEALTH_INSURANCE_ID",
            Label::MilitaryId => "MILITARY_ID",
            Label::MobilePaymentPin => "MOBILE_PAYMENT_PIN",
            Label::PersonalCustomsId => "PERSONAL_CUSTOMS_ID",
        }
    }

    /// True for labels whose pattern covers an entire block (e.g. a PEM
    /// key) rather than a single token — the Document Redactor draws a
    /// full-page box for these instead of a per-word box.
    pub fn is_page_only(&self) -> bool {
        matches!(self, Label::PrivateKey)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownLabel;

impl FromStr for Label {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Label::ALL
            .iter()
            .copied()
            .find(|l| l.as_str() == s)
            .ok_or(UnknownLabel)
    }
}

impl Serialize for Label {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Label {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(|_| de::Error::custom(format!("unknown label: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_as_str() {
        for label in Label::ALL {
            let parsed: Label = label.as_str().parse().unwrap();
            assert_eq!(parsed.as_str(), label.as_str());
        }
    }

    #[test]
    fn unknown_label_is_rejected() {
        assert!("SSN_FOO".parse::<Label>().is_err());
    }

    #[test]
    fn private_key_is_page_only() {
        assert!(Label::PrivateKey.is_page_only());
        assert!(!Label::Phone.is_page_only());
    }
}
