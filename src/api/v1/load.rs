use axum::{extract::Query, extract::State, Json};
use bson::oid::ObjectId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tap::TapFallible;
use time::OffsetDateTime;
use validator::Validate;

use crate::{
    error::Error,
    mongo_ext::Collection,
    util::{FormattedDateTime, ObjectIdString, PathObjectId},
};

use super::auth::{UserAccess, UserRole};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LoadStatus {
    #[default]
    Pending,
    Assigned,
    #[serde(rename = "in transit")]
    InTransit,
    Delivered,
    Cancelled,
}

impl std::fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::InTransit => "in transit",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Who is acting on a load, resolved from the requesting user and the load
/// itself. `Trucker` means the trucker assigned to this load, not any
/// trucker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadActor {
    Shipper,
    Trucker,
    Admin,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadAction {
    Accept,
    Cancel,
    Start,
    Deliver,
}

impl LoadAction {
    pub fn target(self) -> LoadStatus {
        match self {
            Self::Accept => LoadStatus::Assigned,
            Self::Cancel => LoadStatus::Cancelled,
            Self::Start => LoadStatus::InTransit,
            Self::Deliver => LoadStatus::Delivered,
        }
    }
}

/// The complete lifecycle of a load. Anything not listed here is rejected:
/// an unknown (status, action) pair with `InvalidTransition`, a known pair
/// requested by the wrong actor with `Forbidden`.
const TRANSITIONS: &[(LoadStatus, LoadAction, LoadActor)] = &[
    (LoadStatus::Pending, LoadAction::Accept, LoadActor::Shipper),
    (LoadStatus::Pending, LoadAction::Cancel, LoadActor::Shipper),
    (LoadStatus::Pending, LoadAction::Cancel, LoadActor::Admin),
    (LoadStatus::Assigned, LoadAction::Start, LoadActor::Trucker),
    (LoadStatus::InTransit, LoadAction::Deliver, LoadActor::Trucker),
];

impl LoadStatus {
    pub fn apply(self, action: LoadAction, actor: LoadActor) -> Result<LoadStatus, Error> {
        let mut known = false;

        for (from, table_action, table_actor) in TRANSITIONS {
            if *from == self && *table_action == action {
                known = true;
                if *table_actor == actor {
                    return Ok(action.target());
                }
            }
        }

        if known {
            Err(Error::Forbidden)
        } else {
            Err(Error::InvalidTransition {
                from: self,
                to: action.target(),
            })
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Dimensions {
    pub length: Option<f64>,
    pub width: Option<f64>,
    pub height: Option<f64>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LocationModel {
    pub lat: f64,
    pub lng: f64,
    pub address: Option<String>,
    pub updated_at: bson::DateTime,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AlertModel {
    pub r#type: String,
    pub message: String,
    pub created_at: bson::DateTime,
    pub is_read: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoadModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub shipper_id: ObjectId,

    pub origin: String,
    pub destination: String,
    pub shipment_date: bson::DateTime,
    pub weight: f64,
    pub dimensions: Option<Dimensions>,

    pub status: LoadStatus,

    // Non-owning references, resolved through their own collections.
    pub winning_bid: Option<ObjectId>,
    pub assigned_trucker: Option<ObjectId>,

    #[serde(default)]
    pub price: Decimal,

    pub current_location: Option<LocationModel>,

    pub pickup_time: Option<bson::DateTime>,
    pub delivery_time: Option<bson::DateTime>,
    pub estimated_delivery_time: Option<bson::DateTime>,

    #[serde(default)]
    pub alerts: Vec<AlertModel>,

    pub created_at: bson::DateTime,
    pub updated_at: bson::DateTime,
}

#[derive(Clone)]
pub struct LoadCollection(pub Collection<LoadModel>);

impl std::ops::Deref for LoadCollection {
    type Target = Collection<LoadModel>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
    pub address: Option<String>,
    pub updated_at: FormattedDateTime,
}

impl From<LocationModel> for Location {
    fn from(value: LocationModel) -> Self {
        Self {
            lat: value.lat,
            lng: value.lng,
            address: value.address,
            updated_at: value.updated_at.into(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Alert {
    pub r#type: String,
    pub message: String,
    pub created_at: FormattedDateTime,
    pub is_read: bool,
}

impl From<AlertModel> for Alert {
    fn from(value: AlertModel) -> Self {
        Self {
            r#type: value.r#type,
            message: value.message,
            created_at: value.created_at.into(),
            is_read: value.is_read,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Load {
    pub id: ObjectIdString,
    pub shipper_id: ObjectIdString,

    pub origin: String,
    pub destination: String,
    pub shipment_date: FormattedDateTime,
    pub weight: f64,
    pub dimensions: Option<Dimensions>,

    pub status: LoadStatus,

    pub winning_bid: Option<ObjectIdString>,
    pub assigned_trucker: Option<ObjectIdString>,

    pub price: Decimal,

    pub current_location: Option<Location>,

    pub pickup_time: Option<FormattedDateTime>,
    pub delivery_time: Option<FormattedDateTime>,
    pub estimated_delivery_time: Option<FormattedDateTime>,

    pub alerts: Vec<Alert>,

    pub created_at: FormattedDateTime,
    pub updated_at: FormattedDateTime,
}

impl From<LoadModel> for Load {
    fn from(value: LoadModel) -> Self {
        Self {
            id: value.id.into(),
            shipper_id: value.shipper_id.into(),

            origin: value.origin,
            destination: value.destination,
            shipment_date: value.shipment_date.into(),
            weight: value.weight,
            dimensions: value.dimensions,

            status: value.status,

            winning_bid: value.winning_bid.map(Into::into),
            assigned_trucker: value.assigned_trucker.map(Into::into),

            price: value.price,

            current_location: value.current_location.map(Into::into),

            pickup_time: value.pickup_time.map(Into::into),
            delivery_time: value.delivery_time.map(Into::into),
            estimated_delivery_time: value.estimated_delivery_time.map(Into::into),

            alerts: value.alerts.into_iter().map(Into::into).collect(),

            created_at: value.created_at.into(),
            updated_at: value.updated_at.into(),
        }
    }
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
pub struct CreateRequest {
    #[validate(length(min = 1, max = 256))]
    pub origin: String,

    #[validate(length(min = 1, max = 256))]
    pub destination: String,

    pub shipment_date: FormattedDateTime,
    pub weight: f64,
    pub dimensions: Option<Dimensions>,
    pub estimated_delivery_time: Option<FormattedDateTime>,
}

#[tracing::instrument(
    skip_all,
    fields(
        user = ?user,
    )
)]
pub async fn create(
    State(loads): State<LoadCollection>,
    user: UserAccess,
    Json(request): Json<CreateRequest>,
) -> Result<Json<Load>, Error> {
    match user.role {
        UserRole::Trucker | UserRole::Admin | UserRole::Superadmin => {
            return Err(Error::Forbidden)
                .tap_err(|_| tracing::debug!("only shippers can post loads"))
        }
        UserRole::Shipper => {}
    }

    request.validate()?;

    if request.weight < 0.0 {
        return Err(Error::Forbidden)
            .tap_err(|_| tracing::debug!("tried posting a load with negative weight"));
    }

    let model = LoadModel {
        id: ObjectId::new(),
        shipper_id: user.id,
        origin: request.origin,
        destination: request.destination,
        shipment_date: request.shipment_date.into(),
        weight: request.weight,
        dimensions: request.dimensions,
        status: LoadStatus::Pending,
        winning_bid: None,
        assigned_trucker: None,
        price: Decimal::from(0),
        current_location: None,
        pickup_time: None,
        delivery_time: None,
        estimated_delivery_time: request.estimated_delivery_time.map(Into::into),
        alerts: vec![],
        created_at: OffsetDateTime::now_utc().into(),
        updated_at: OffsetDateTime::now_utc().into(),
    };

    tracing::debug!("posting load {:#?}", model);
    loads.insert_one(&model, None).await?;

    Ok(Json(model.into()))
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct IndexQuery {
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub shipment_date: Option<FormattedDateTime>,
    pub status: Option<LoadStatus>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IndexResponse {
    pub loads: Vec<Load>,
}

pub async fn index(
    State(loads): State<LoadCollection>,
    user: UserAccess,
    Query(query): Query<IndexQuery>,
) -> Result<Json<IndexResponse>, Error> {
    let mut filter = bson::doc! {};

    if let Some(origin) = query.origin {
        filter.insert("origin", bson::doc! { "$regex": origin, "$options": "i" });
    }

    if let Some(destination) = query.destination {
        filter.insert(
            "destination",
            bson::doc! { "$regex": destination, "$options": "i" },
        );
    }

    if let Some(date) = query.shipment_date {
        filter.insert(
            "shipment_date",
            bson::doc! { "$gte": bson::DateTime::from(date) },
        );
    }

    if let Some(status) = query.status {
        filter.insert("status", bson::to_bson(&status)?);
    }

    // Truckers browse the open board, shippers see their own postings.
    match user.role {
        UserRole::Trucker => {
            filter.insert("status", bson::to_bson(&LoadStatus::Pending)?);
        }
        UserRole::Shipper => {
            filter.insert("shipper_id", user.id);
        }
        UserRole::Admin | UserRole::Superadmin => {}
    }

    let options = mongodb::options::FindOptions::builder()
        .sort(bson::doc! { "created_at": -1 })
        .build();

    let mut cursor = loads.find(filter, options).await?;

    let mut result = vec![];

    while cursor.advance().await? {
        let load = cursor.deserialize_current()?;

        result.push(load.into());
    }

    Ok(Json(IndexResponse { loads: result }))
}

pub async fn show(
    State(loads): State<LoadCollection>,
    _user: UserAccess,
    PathObjectId(load_id): PathObjectId,
) -> Result<Json<Load>, Error> {
    let load = loads
        .find_one(bson::doc! { "_id": load_id }, None)
        .await?
        .ok_or(Error::NoResource)?;

    Ok(Json(load.into()))
}

fn resolve_actor(load: &LoadModel, user: &UserAccess) -> Result<LoadActor, Error> {
    if user.role.is_admin() {
        return Ok(LoadActor::Admin);
    }

    if load.shipper_id == user.id {
        return Ok(LoadActor::Shipper);
    }

    if load.assigned_trucker == Some(user.id) {
        return Ok(LoadActor::Trucker);
    }

    Err(Error::Forbidden)
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UpdateStatusRequest {
    pub status: LoadStatus,
}

#[tracing::instrument(
    skip_all,
    fields(
        id = %load_id,
        user = ?user,
    )
)]
pub async fn update_status(
    State(loads): State<LoadCollection>,
    user: UserAccess,
    PathObjectId(load_id): PathObjectId,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<Load>, Error> {
    let mut load = loads
        .find_one(bson::doc! { "_id": load_id }, None)
        .await?
        .ok_or(Error::NoResource)
        .tap_err(|_| tracing::debug!("tried updating status of non existing load"))?;

    // Assignment carries a bid and a price with it, so it only ever happens
    // through bid acceptance.
    let action = match request.status {
        LoadStatus::Cancelled => LoadAction::Cancel,
        LoadStatus::InTransit => LoadAction::Start,
        LoadStatus::Delivered => LoadAction::Deliver,
        LoadStatus::Pending | LoadStatus::Assigned => {
            return Err(Error::InvalidTransition {
                from: load.status,
                to: request.status,
            })
        }
    };

    let actor = resolve_actor(&load, &user)
        .tap_err(|_| tracing::debug!("user unrelated to load tried changing its status"))?;

    load.status = load.status.apply(action, actor)?;

    let now = bson::DateTime::from(OffsetDateTime::now_utc());

    match load.status {
        LoadStatus::InTransit => load.pickup_time = Some(now),
        LoadStatus::Delivered => load.delivery_time = Some(now),
        _ => {}
    }
    load.updated_at = now;

    loads
        .update_one(
            bson::doc! { "_id": load_id },
            bson::doc! {
                "$set": {
                    "status": bson::to_bson(&load.status)?,
                    "pickup_time": load.pickup_time,
                    "delivery_time": load.delivery_time,
                    "updated_at": now,
                }
            },
            None,
        )
        .await?;

    Ok(Json(load.into()))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UpdateLocationRequest {
    pub lat: f64,
    pub lng: f64,
    pub address: Option<String>,
}

#[tracing::instrument(
    skip_all,
    fields(
        id = %load_id,
        user = ?user,
    )
)]
pub async fn update_location(
    State(loads): State<LoadCollection>,
    user: UserAccess,
    PathObjectId(load_id): PathObjectId,
    Json(request): Json<UpdateLocationRequest>,
) -> Result<Json<Load>, Error> {
    match user.role {
        UserRole::Shipper | UserRole::Admin | UserRole::Superadmin => {
            return Err(Error::Forbidden)
                .tap_err(|_| tracing::debug!("only truckers report tracking updates"))
        }
        UserRole::Trucker => {}
    }

    let mut load = loads
        .find_one(bson::doc! { "_id": load_id }, None)
        .await?
        .ok_or(Error::NoResource)?;

    if load.assigned_trucker != Some(user.id) {
        return Err(Error::Forbidden)
            .tap_err(|_| tracing::debug!("trucker not assigned to this load"));
    }

    let now = bson::DateTime::from(OffsetDateTime::now_utc());

    load.current_location = Some(LocationModel {
        lat: request.lat,
        lng: request.lng,
        address: request.address,
        updated_at: now,
    });

    // The first tracking update while assigned means the truck picked the
    // load up.
    if load.status == LoadStatus::Assigned {
        load.status = load.status.apply(LoadAction::Start, LoadActor::Trucker)?;
        load.pickup_time = Some(now);
    }
    load.updated_at = now;

    loads
        .update_one(
            bson::doc! { "_id": load_id },
            bson::doc! {
                "$set": {
                    "current_location": bson::to_bson(&load.current_location)?,
                    "status": bson::to_bson(&load.status)?,
                    "pickup_time": load.pickup_time,
                    "updated_at": now,
                }
            },
            None,
        )
        .await?;

    Ok(Json(load.into()))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AddAlertRequest {
    pub r#type: String,
    pub message: String,
}

pub async fn add_alert(
    State(loads): State<LoadCollection>,
    user: UserAccess,
    PathObjectId(load_id): PathObjectId,
    Json(request): Json<AddAlertRequest>,
) -> Result<Json<Load>, Error> {
    match user.role {
        UserRole::Trucker => {
            return Err(Error::Forbidden)
                .tap_err(|_| tracing::debug!("tried adding alert as trucker"))
        }
        UserRole::Shipper | UserRole::Admin | UserRole::Superadmin => {}
    }

    let mut load = loads
        .find_one(bson::doc! { "_id": load_id }, None)
        .await?
        .ok_or(Error::NoResource)?;

    if user.role == UserRole::Shipper && load.shipper_id != user.id {
        return Err(Error::Forbidden)
            .tap_err(|_| tracing::debug!("tried adding alert to other shipper load"));
    }

    let alert = AlertModel {
        r#type: request.r#type,
        message: request.message,
        created_at: OffsetDateTime::now_utc().into(),
        is_read: false,
    };

    loads
        .update_one(
            bson::doc! { "_id": load_id },
            bson::doc! {
                "$push": {
                    "alerts": bson::to_bson(&alert)?,
                }
            },
            None,
        )
        .await?;

    load.alerts.push(alert);

    Ok(Json(load.into()))
}
