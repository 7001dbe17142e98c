use axum::{extract::State, Json};
use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use tap::TapFallible;
use time::OffsetDateTime;
use validator::Validate;

use crate::{
    error::Error,
    mongo_ext::Collection,
    util::{FormattedDateTime, ObjectIdString, PathObjectId},
};

use super::auth::{UserAccess, UserModel, UserRole};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BenefitType {
    Insurance,
    Discount,
    Service,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BenefitCategory {
    Tires,
    SpareParts,
    Service,
    Lodging,
    Food,
    Fuel,
    Insurance,
    Other,
}

/// Per-benefit eligibility. Looser than the global policy on purpose: each
/// criterion only binds when it is present, so a trucker who fails global
/// eligibility can still qualify for a benefit that does not check the
/// failing dimension.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct EligibilityCriteria {
    #[serde(default)]
    pub min_driver_experience: i64,
    #[serde(default)]
    pub no_accidents: bool,
    #[serde(default)]
    pub no_theft_complaints: bool,
    pub max_truck_age: Option<i64>,
}

impl EligibilityCriteria {
    /// Absent or zero criteria impose no constraint.
    pub fn allows(&self, trucker: &UserModel) -> bool {
        (!self.no_accidents || trucker.accidents == 0)
            && (!self.no_theft_complaints || trucker.theft_complaints == 0)
            && self
                .max_truck_age
                .map_or(true, |max| max == 0 || trucker.truck_age <= max)
            && (self.min_driver_experience <= 0
                || trucker.drivers_license_years >= self.min_driver_experience)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BenefitModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub name: String,
    pub r#type: BenefitType,
    pub description: String,

    pub discount: Option<f64>,
    pub provider: Option<String>,

    #[serde(default)]
    pub eligibility_criteria: EligibilityCriteria,

    pub category: Option<BenefitCategory>,

    pub valid_from: bson::DateTime,
    pub valid_until: Option<bson::DateTime>,
    pub is_active: bool,

    pub created_at: bson::DateTime,
    pub updated_at: bson::DateTime,
    pub deleted_at: Option<bson::DateTime>,
}

#[derive(Clone)]
pub struct BenefitCollection(pub Collection<BenefitModel>);

impl std::ops::Deref for BenefitCollection {
    type Target = Collection<BenefitModel>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Benefit {
    pub id: ObjectIdString,

    pub name: String,
    pub r#type: BenefitType,
    pub description: String,

    pub discount: Option<f64>,
    pub provider: Option<String>,

    pub eligibility_criteria: EligibilityCriteria,

    pub category: Option<BenefitCategory>,

    pub valid_from: FormattedDateTime,
    pub valid_until: Option<FormattedDateTime>,
    pub is_active: bool,

    pub created_at: FormattedDateTime,
    pub updated_at: FormattedDateTime,
    pub deleted_at: Option<FormattedDateTime>,
}

impl From<BenefitModel> for Benefit {
    fn from(value: BenefitModel) -> Self {
        Self {
            id: value.id.into(),

            name: value.name,
            r#type: value.r#type,
            description: value.description,

            discount: value.discount,
            provider: value.provider,

            eligibility_criteria: value.eligibility_criteria,

            category: value.category,

            valid_from: value.valid_from.into(),
            valid_until: value.valid_until.map(Into::into),
            is_active: value.is_active,

            created_at: value.created_at.into(),
            updated_at: value.updated_at.into(),
            deleted_at: value.deleted_at.map(Into::into),
        }
    }
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
pub struct CreateRequest {
    #[validate(length(min = 1, max = 124))]
    pub name: String,

    pub r#type: BenefitType,

    #[validate(length(min = 1, max = 1024))]
    pub description: String,

    pub discount: Option<f64>,
    pub provider: Option<String>,

    #[serde(default)]
    pub eligibility_criteria: EligibilityCriteria,

    pub category: Option<BenefitCategory>,

    pub valid_until: Option<FormattedDateTime>,
}

pub async fn create(
    State(benefits): State<BenefitCollection>,
    user: UserAccess,
    Json(request): Json<CreateRequest>,
) -> Result<Json<Benefit>, Error> {
    match user.role {
        UserRole::Shipper | UserRole::Trucker => {
            return Err(Error::Forbidden)
                .tap_err(|_| tracing::debug!("tried creating benefit as non admin"))
        }
        UserRole::Admin | UserRole::Superadmin => {}
    }

    request.validate()?;

    let model = BenefitModel {
        id: ObjectId::new(),
        name: request.name,
        r#type: request.r#type,
        description: request.description,
        discount: request.discount,
        provider: request.provider,
        eligibility_criteria: request.eligibility_criteria,
        category: request.category,
        valid_from: OffsetDateTime::now_utc().into(),
        valid_until: request.valid_until.map(Into::into),
        is_active: true,
        created_at: OffsetDateTime::now_utc().into(),
        updated_at: OffsetDateTime::now_utc().into(),
        deleted_at: None,
    };

    benefits.insert_one(&model, None).await?;

    Ok(Json(model.into()))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IndexResponse {
    pub benefits: Vec<Benefit>,
}

pub async fn index(
    State(benefits): State<BenefitCollection>,
    _user: UserAccess,
) -> Result<Json<IndexResponse>, Error> {
    let mut cursor = benefits
        .find_exists(bson::doc! { "is_active": true }, None)
        .await?;

    let mut result = vec![];

    while cursor.advance().await? {
        let benefit = cursor.deserialize_current()?;

        result.push(benefit.into());
    }

    Ok(Json(IndexResponse { benefits: result }))
}

/// Active benefits whose criteria the calling trucker satisfies.
pub async fn eligible(
    State(benefits): State<BenefitCollection>,
    user: UserModel,
) -> Result<Json<IndexResponse>, Error> {
    match user.role {
        UserRole::Shipper | UserRole::Admin | UserRole::Superadmin => {
            return Err(Error::Forbidden)
                .tap_err(|_| tracing::debug!("only truckers have benefit eligibility"))
        }
        UserRole::Trucker => {}
    }

    let mut cursor = benefits
        .find_exists(bson::doc! { "is_active": true }, None)
        .await?;

    let mut result = vec![];

    while cursor.advance().await? {
        let benefit: BenefitModel = cursor.deserialize_current()?;

        if benefit.eligibility_criteria.allows(&user) {
            result.push(benefit.into());
        }
    }

    Ok(Json(IndexResponse { benefits: result }))
}

pub async fn show(
    State(benefits): State<BenefitCollection>,
    _user: UserAccess,
    PathObjectId(benefit_id): PathObjectId,
) -> Result<Json<Benefit>, Error> {
    let benefit = benefits
        .find_exists_one_by_id(benefit_id)
        .await?
        .ok_or(Error::NoResource)?;

    Ok(Json(benefit.into()))
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
pub struct UpdateRequest {
    #[validate(length(min = 1, max = 124))]
    pub name: String,

    pub r#type: BenefitType,

    #[validate(length(min = 1, max = 1024))]
    pub description: String,

    pub discount: Option<f64>,
    pub provider: Option<String>,

    #[serde(default)]
    pub eligibility_criteria: EligibilityCriteria,

    pub category: Option<BenefitCategory>,

    pub valid_until: Option<FormattedDateTime>,
    pub is_active: bool,
}

pub async fn update(
    State(benefits): State<BenefitCollection>,
    user: UserAccess,
    PathObjectId(benefit_id): PathObjectId,
    Json(request): Json<UpdateRequest>,
) -> Result<Json<Benefit>, Error> {
    match user.role {
        UserRole::Shipper | UserRole::Trucker => {
            return Err(Error::Forbidden)
                .tap_err(|_| tracing::debug!("tried updating benefit as non admin"))
        }
        UserRole::Admin | UserRole::Superadmin => {}
    }

    request.validate()?;

    let benefit = benefits
        .find_exists_one_by_id(benefit_id)
        .await?
        .ok_or(Error::NoResource)
        .tap_err(|_| tracing::debug!("tried updating non existing benefit"))?;

    let benefit = BenefitModel {
        name: request.name,
        r#type: request.r#type,
        description: request.description,
        discount: request.discount,
        provider: request.provider,
        eligibility_criteria: request.eligibility_criteria,
        category: request.category,
        valid_until: request.valid_until.map(Into::into),
        is_active: request.is_active,

        id: benefit.id,
        valid_from: benefit.valid_from,
        created_at: benefit.created_at,
        updated_at: OffsetDateTime::now_utc().into(),
        deleted_at: benefit.deleted_at,
    };

    benefits
        .update_exists_one_by_id(
            benefit_id,
            bson::doc! {
                "$set": bson::to_document(&benefit)?
            },
        )
        .await?;

    Ok(Json(benefit.into()))
}

pub async fn delete(
    State(benefits): State<BenefitCollection>,
    user: UserAccess,
    PathObjectId(benefit_id): PathObjectId,
) -> Result<(), Error> {
    match user.role {
        UserRole::Shipper | UserRole::Trucker => {
            return Err(Error::Forbidden)
                .tap_err(|_| tracing::debug!("tried deleting benefit as non admin"))
        }
        UserRole::Admin | UserRole::Superadmin => {}
    }

    benefits
        .find_exists_one_by_id(benefit_id)
        .await?
        .ok_or(Error::NoResource)
        .tap_err(|_| tracing::debug!("tried deleting non existing benefit"))?;

    benefits.soft_delete_one_by_id(benefit_id).await?;

    Ok(())
}
