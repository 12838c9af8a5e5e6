//! Shared domain types: document classes, lifecycle states, access types
//! and request actors.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Class of an uploaded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentClass {
    /// Birth certificate.
    BirthCertificate,
    /// National identity card.
    NationalId,
    /// Passport.
    Passport,
    /// Driver's license.
    DriversLicense,
    /// Professional license or credential.
    ProfessionalLicense,
    /// Academic certificate or diploma.
    AcademicCertificate,
    /// Land title.
    LandTitle,
    /// Property deed.
    PropertyDeed,
    /// Vehicle registration.
    VehicleRegistration,
}

impl DocumentClass {
    /// All classes, identity facts first.
    pub const ALL: [DocumentClass; 9] = [
        Self::BirthCertificate,
        Self::NationalId,
        Self::Passport,
        Self::DriversLicense,
        Self::ProfessionalLicense,
        Self::AcademicCertificate,
        Self::LandTitle,
        Self::PropertyDeed,
        Self::VehicleRegistration,
    ];

    /// How a verified document of this class is issued.
    ///
    /// Identity facts become non-transferable attestations; ownership
    /// assets become transferable tokens.
    #[must_use]
    pub const fn issuance_kind(&self) -> IssuanceKind {
        match self {
            Self::LandTitle | Self::PropertyDeed | Self::VehicleRegistration => {
                IssuanceKind::Transferable
            },
            Self::BirthCertificate
            | Self::NationalId
            | Self::Passport
            | Self::DriversLicense
            | Self::ProfessionalLicense
            | Self::AcademicCertificate => IssuanceKind::NonTransferable,
        }
    }

    /// Whether tamper detection is skipped for this class.
    ///
    /// Certificates without a photo or physical security print are not
    /// identity-bearing, so tamper analysis adds cost without signal.
    #[must_use]
    pub const fn skips_tamper_analysis(&self) -> bool {
        matches!(self, Self::BirthCertificate | Self::AcademicCertificate)
    }

    /// Wire name of this class.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::BirthCertificate => "BIRTH_CERTIFICATE",
            Self::NationalId => "NATIONAL_ID",
            Self::Passport => "PASSPORT",
            Self::DriversLicense => "DRIVERS_LICENSE",
            Self::ProfessionalLicense => "PROFESSIONAL_LICENSE",
            Self::AcademicCertificate => "ACADEMIC_CERTIFICATE",
            Self::LandTitle => "LAND_TITLE",
            Self::PropertyDeed => "PROPERTY_DEED",
            Self::VehicleRegistration => "VEHICLE_REGISTRATION",
        }
    }
}

impl fmt::Display for DocumentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Issuance category derived from [`DocumentClass`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssuanceKind {
    /// Issuer-signed attestation bound to the holder.
    NonTransferable,
    /// Uniquely identified token that can change owner.
    Transferable,
}

/// Lifecycle of a [`Document`](crate::document::Document).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleStatus {
    /// Uploaded, or waiting on a human reviewer.
    Pending,
    /// Forensic analysis in progress.
    Analyzing,
    /// Forensic pass, not yet issued.
    Verified,
    /// Ledger record exists.
    Issued,
    /// Rejected by score or reviewer. Terminal.
    Rejected,
}

impl LifecycleStatus {
    /// Check whether moving to `next` is a legal transition.
    ///
    /// ```text
    /// PENDING -> ANALYZING -> VERIFIED -> ISSUED
    ///              |   \-> REJECTED
    ///              \-> PENDING (under review) -> VERIFIED | REJECTED
    /// ```
    #[must_use]
    pub const fn can_transition_to(&self, next: LifecycleStatus) -> bool {
        use LifecycleStatus::*;
        matches!(
            (self, next),
            (Pending, Analyzing)
                | (Pending, Verified)
                | (Pending, Rejected)
                | (Analyzing, Verified)
                | (Analyzing, Rejected)
                | (Analyzing, Pending)
                | (Verified, Issued)
        )
    }

    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Issued | Self::Rejected)
    }
}

impl fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Analyzing => "ANALYZING",
            Self::Verified => "VERIFIED",
            Self::Issued => "ISSUED",
            Self::Rejected => "REJECTED",
        };
        f.write_str(s)
    }
}

/// Type of access granted on a document.
///
/// Access types are not hierarchical: `Verify` does not imply `Read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessType {
    /// View the document and its archived copy.
    Read,
    /// Re-share the document.
    Share,
    /// Check the document's issuance status.
    Verify,
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Read => "READ",
            Self::Share => "SHARE",
            Self::Verify => "VERIFY",
        };
        f.write_str(s)
    }
}

/// Role of the identity making a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorRole {
    /// Document owner or grantee.
    Citizen,
    /// Staff allowed to resolve the review queue.
    Reviewer,
    /// Third-party verifier.
    Verifier,
}

/// Authenticated identity attached to a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Identity id.
    pub id: String,
    /// Role of this identity.
    pub role: ActorRole,
}

impl Actor {
    /// A citizen identity.
    pub fn citizen(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: ActorRole::Citizen,
        }
    }

    /// A reviewer identity.
    pub fn reviewer(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: ActorRole::Reviewer,
        }
    }

    /// A verifier identity.
    pub fn verifier(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: ActorRole::Verifier,
        }
    }

    /// Reject anonymous actors.
    pub(crate) fn authenticated(&self) -> Result<&str, crate::error::DocVerifyError> {
        if self.id.trim().is_empty() {
            return Err(crate::error::DocVerifyError::NotAuthenticated);
        }
        Ok(&self.id)
    }
}
