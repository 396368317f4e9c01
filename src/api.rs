//! Low level API JSON objects.
//!
//! Unstable and not to be used directly. Provided to aid debugging.
#![allow(non_snake_case)]
#![allow(non_camel_case_types)]

use serde::{
    ser::{SerializeMap, Serializer},
    Deserialize, Serialize,
};

/// Serializes to `""`
pub struct ApiEmptyString;
impl Serialize for ApiEmptyString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str("")
    }
}

/// Serializes to `{}`
pub struct ApiEmptyObject;
impl Serialize for ApiEmptyObject {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let m = serializer.serialize_map(Some(0))?;
        m.end()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ApiProblem {
    #[serde(rename = "type")]
    pub _type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subproblems: Option<Vec<ApiSubproblem>>,
}

impl ApiProblem {
    pub fn is_bad_nonce(&self) -> bool {
        self._type == "badNonce" || self._type.ends_with(":badNonce")
    }
    pub fn is_rate_limited(&self) -> bool {
        self._type == "rateLimited" || self._type.ends_with(":rateLimited")
    }
}

impl ::std::fmt::Display for ApiProblem {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
        if let Some(detail) = &self.detail {
            write!(f, "{}: {}", self._type, detail)
        } else {
            write!(f, "{}", self._type)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ApiSubproblem {
    #[serde(rename = "type")]
    pub _type: String,
    pub detail: Option<String>,
    pub identifier: Option<ApiIdentifier>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ApiDirectory {
    pub newNonce: String,
    pub newAccount: String,
    pub newOrder: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newAuthz: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revokeCert: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyChange: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ApiDirectoryMeta>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ApiDirectoryMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub termsOfService: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caaIdentities: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub externalAccountRequired: Option<bool>,
}

impl ApiDirectoryMeta {
    pub fn externalAccountRequired(&self) -> bool {
        self.externalAccountRequired.unwrap_or(false)
    }
}

//    {
//      "status": "valid",
//      "contact": [
//        "mailto:cert-admin@example.com",
//        "mailto:admin@example.com"
//      ],
//      "termsOfServiceAgreed": true,
//      "orders": "https://example.com/acme/acct/evOfKhNU60wg/orders"
//    }
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ApiAccount {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub contact: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub termsOfServiceAgreed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orders: Option<String>,
}

impl ApiAccount {
    pub fn is_status_valid(&self) -> bool {
        self.status.as_ref().map(|s| s.as_ref()) == Some("valid")
    }
    pub fn termsOfServiceAgreed(&self) -> bool {
        self.termsOfServiceAgreed.unwrap_or(false)
    }
}

/// Order life cycle. Moves forward only; `invalid` is reachable from any
/// non-terminal state and both `valid` and `invalid` are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        self == OrderStatus::Valid || self == OrderStatus::Invalid
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn may_advance_to(self, next: OrderStatus) -> bool {
        if self.is_terminal() {
            return next == self;
        }
        if next == OrderStatus::Invalid {
            return true;
        }
        self.rank() <= next.rank()
    }

    fn rank(self) -> u8 {
        match self {
            OrderStatus::Pending => 0,
            OrderStatus::Ready => 1,
            OrderStatus::Processing => 2,
            OrderStatus::Valid => 3,
            OrderStatus::Invalid => 4,
        }
    }
}

// {
//   "status": "pending",
//   "expires": "2019-01-09T08:26:43.570360537Z",
//   "identifiers": [
//     {
//       "type": "dns",
//       "value": "acmetest.example.com"
//     }
//   ],
//   "authorizations": [
//     "https://example.com/acme/authz/YTqpYUthlVfwBncUufE8IRA2TkzZkN4eYWWLMSRqcSs"
//   ],
//   "finalize": "https://example.com/acme/finalize/7738992/18234324"
// }
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ApiOrder {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<OrderStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,
    pub identifiers: Vec<ApiIdentifier>,
    pub notBefore: Option<String>,
    pub notAfter: Option<String>,
    pub error: Option<ApiProblem>,
    pub authorizations: Option<Vec<String>>,
    pub finalize: String,
    pub certificate: Option<String>,
}

impl ApiOrder {
    /// As long as there are outstanding authorizations.
    pub fn is_status_pending(&self) -> bool {
        self.status == Some(OrderStatus::Pending)
    }
    /// When all authorizations are finished, and we need to call "finalize".
    pub fn is_status_ready(&self) -> bool {
        self.status == Some(OrderStatus::Ready)
    }
    /// On "finalize" the server is processing to sign the CSR.
    pub fn is_status_processing(&self) -> bool {
        self.status == Some(OrderStatus::Processing)
    }
    /// Once the certificate is issued and can be downloaded.
    pub fn is_status_valid(&self) -> bool {
        self.status == Some(OrderStatus::Valid)
    }
    /// If the order failed and can't be used again.
    pub fn is_status_invalid(&self) -> bool {
        self.status == Some(OrderStatus::Invalid)
    }
    /// Return all domains.
    pub fn domains(&self) -> Vec<&str> {
        self.identifiers.iter().map(|i| i.value.as_ref()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiIdentifier {
    #[serde(rename = "type")]
    pub _type: String,
    pub value: String,
}

impl ApiIdentifier {
    pub fn is_type_dns(&self) -> bool {
        self._type == "dns"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthStatus {
    Pending,
    Valid,
    Invalid,
    Deactivated,
    Expired,
    Revoked,
}

// {
//   "identifier": {
//     "type": "dns",
//     "value": "acmetest.example.com"
//   },
//   "status": "pending",
//   "expires": "2019-01-09T08:26:43Z",
//   "challenges": [
//     {
//       "type": "http-01",
//       "status": "pending",
//       "url": "https://example.com/acme/challenge/YTqpYUthlVfwBncUufE8IRA2TkzZkN4eYWWLMSRqcSs/216789597",
//       "token": "MUi-gqeOJdRkSb_YR2eaMxQBqf6al8dgt_dOttSWb0w"
//     },
//     {
//       "type": "dns-01",
//       "status": "pending",
//       "url": "https://example.com/acme/challenge/YTqpYUthlVfwBncUufE8IRA2TkzZkN4eYWWLMSRqcSs/216789599",
//       "token": "RRo2ZcXAEqxKvMH8RGcATjSK1KknLEUmauwfQ5i3gG8"
//     }
//   ]
// }
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiAuth {
    pub identifier: ApiIdentifier,
    pub status: Option<AuthStatus>,
    pub expires: Option<String>,
    pub challenges: Vec<ApiChallenge>,
    pub wildcard: Option<bool>,
}

impl ApiAuth {
    pub fn is_status_pending(&self) -> bool {
        self.status == Some(AuthStatus::Pending)
    }
    pub fn is_status_valid(&self) -> bool {
        self.status == Some(AuthStatus::Valid)
    }
    pub fn is_status_invalid(&self) -> bool {
        self.status == Some(AuthStatus::Invalid)
    }
    pub fn wildcard(&self) -> bool {
        self.wildcard.unwrap_or(false)
    }
    pub fn challenge_of_type(&self, _type: &str) -> Option<&ApiChallenge> {
        self.challenges.iter().find(|c| c._type == _type)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

// on an incorrect challenge, something like:
//
//     {
//       "type": "dns-01",
//       "status": "invalid",
//       "error": {
//         "type": "urn:ietf:params:acme:error:dns",
//         "detail": "DNS problem: NXDOMAIN looking up TXT for _acme-challenge.martintest.foobar.com",
//         "status": 400
//       },
//       "url": "https://example.com/acme/challenge/afyChhlFB8GLLmIqEnqqcXzX0Ss3GBw6oUlKAGDG6lY/221695600",
//       "token": "YsNqBWZnyYjDun3aUC2CkCopOaqZRrI5hp3tUjxPLQU"
//     }
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiChallenge {
    pub url: String,
    #[serde(rename = "type")]
    pub _type: String,
    pub status: ChallengeStatus,
    pub token: String,
    pub validated: Option<String>,
    pub error: Option<ApiProblem>,
}

impl ApiChallenge {
    pub fn is_status_pending(&self) -> bool {
        self.status == ChallengeStatus::Pending
    }
    pub fn is_status_processing(&self) -> bool {
        self.status == ChallengeStatus::Processing
    }
    pub fn is_status_valid(&self) -> bool {
        self.status == ChallengeStatus::Valid
    }
    pub fn is_status_invalid(&self) -> bool {
        self.status == ChallengeStatus::Invalid
    }
    /// The CA's problem detail, or its type when no detail was given.
    pub fn error_detail(&self) -> String {
        match &self.error {
            Some(problem) => problem
                .detail
                .clone()
                .unwrap_or_else(|| problem._type.clone()),
            None => "validation failed and no error found".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiFinalize {
    pub csr: String,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_api_empty_string() {
        let x = serde_json::to_string(&ApiEmptyString).unwrap();
        assert_eq!("\"\"", x);
    }

    #[test]
    fn test_api_empty_object() {
        let x = serde_json::to_string(&ApiEmptyObject).unwrap();
        assert_eq!("{}", x);
    }

    #[test]
    fn test_order_status_parses_lowercase() {
        let s: OrderStatus = serde_json::from_str("\"processing\"").unwrap();
        assert_eq!(s, OrderStatus::Processing);
    }

    #[test]
    fn test_order_status_moves_forward_only() {
        use OrderStatus::*;
        assert!(Pending.may_advance_to(Ready));
        assert!(Ready.may_advance_to(Processing));
        assert!(Processing.may_advance_to(Valid));
        assert!(Pending.may_advance_to(Valid));
        // invalid is reachable from any non-terminal state
        assert!(Pending.may_advance_to(Invalid));
        assert!(Ready.may_advance_to(Invalid));
        assert!(Processing.may_advance_to(Invalid));
        // no going back
        assert!(!Ready.may_advance_to(Pending));
        assert!(!Processing.may_advance_to(Ready));
        // terminals are absorbing
        assert!(!Valid.may_advance_to(Processing));
        assert!(!Valid.may_advance_to(Invalid));
        assert!(!Invalid.may_advance_to(Pending));
        assert!(Valid.may_advance_to(Valid));
    }

    #[test]
    fn test_bad_nonce_detection() {
        let p = ApiProblem {
            _type: "urn:ietf:params:acme:error:badNonce".into(),
            detail: None,
            subproblems: None,
        };
        assert!(p.is_bad_nonce());
        assert!(!p.is_rate_limited());
    }

    #[test]
    fn test_challenge_error_detail() {
        let chall: ApiChallenge = serde_json::from_str(
            r#"{
                "type": "dns-01",
                "status": "invalid",
                "error": {
                    "type": "urn:ietf:params:acme:error:dns",
                    "detail": "NXDOMAIN looking up TXT"
                },
                "url": "https://example.com/acme/chall/1",
                "token": "tok",
                "validated": null
            }"#,
        )
        .unwrap();
        assert!(chall.is_status_invalid());
        assert_eq!(chall.error_detail(), "NXDOMAIN looking up TXT");
    }
}
