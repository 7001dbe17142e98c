use axum::{extract::State, Json};
use bson::oid::ObjectId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tap::TapFallible;
use time::{Duration, OffsetDateTime};

use crate::{
    error::Error,
    mongo_ext::Collection,
    util::{FormattedDateTime, ObjectIdString, PathObjectId},
};

use super::{
    auth::{UserAccess, UserModel, UserRole},
    load::{Load, LoadAction, LoadActor, LoadCollection},
};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BidStatus {
    #[default]
    Pending,
    Accepted,
    Rejected,
    Expired,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BidModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub load_id: ObjectId,
    pub trucker_id: ObjectId,

    pub amount: Decimal,
    pub status: BidStatus,
    pub notes: Option<String>,

    // Eligibility as evaluated when the bid was placed. Deliberately never
    // recomputed, even if the trucker's profile changes afterwards.
    pub trucker_eligible: bool,

    pub expires_at: bson::DateTime,
    pub accepted_at: Option<bson::DateTime>,
    pub rejected_at: Option<bson::DateTime>,

    pub created_at: bson::DateTime,
}

impl BidModel {
    /// Streaming minimum over eligible bids: a bid takes the winning slot
    /// only if its trucker was eligible at bid time and its amount strictly
    /// undercuts the current winner. An equal amount keeps the earlier bid.
    pub fn undercuts(&self, current_winning_amount: Option<Decimal>) -> bool {
        self.trucker_eligible
            && current_winning_amount.map_or(true, |winning| self.amount < winning)
    }
}

#[derive(Clone)]
pub struct BidCollection(pub Collection<BidModel>);

impl std::ops::Deref for BidCollection {
    type Target = Collection<BidModel>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Bid {
    pub id: ObjectIdString,
    pub load_id: ObjectIdString,
    pub trucker_id: ObjectIdString,

    pub amount: Decimal,
    pub status: BidStatus,
    pub notes: Option<String>,

    pub trucker_eligible: bool,

    pub expires_at: FormattedDateTime,
    pub accepted_at: Option<FormattedDateTime>,
    pub rejected_at: Option<FormattedDateTime>,

    pub created_at: FormattedDateTime,
}

impl From<BidModel> for Bid {
    fn from(value: BidModel) -> Self {
        Self {
            id: value.id.into(),
            load_id: value.load_id.into(),
            trucker_id: value.trucker_id.into(),

            amount: value.amount,
            status: value.status,
            notes: value.notes,

            trucker_eligible: value.trucker_eligible,

            expires_at: value.expires_at.into(),
            accepted_at: value.accepted_at.map(Into::into),
            rejected_at: value.rejected_at.map(Into::into),

            created_at: value.created_at.into(),
        }
    }
}

fn transaction_options() -> mongodb::options::TransactionOptions {
    mongodb::options::TransactionOptions::builder()
        .read_concern(mongodb::options::ReadConcern::snapshot())
        .write_concern(
            mongodb::options::WriteConcern::builder()
                .w(mongodb::options::Acknowledgment::Majority)
                .build(),
        )
        .selection_criteria(mongodb::options::SelectionCriteria::ReadPreference(
            mongodb::options::ReadPreference::Primary,
        ))
        .build()
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CreateRequest {
    pub load_id: ObjectIdString,
    pub amount: Decimal,
    pub notes: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CreateResponse {
    pub bid: Bid,
    pub is_eligible: bool,
}

#[tracing::instrument(
    skip_all,
    fields(
        user = %user.id,
    )
)]
pub async fn create(
    State(bids): State<BidCollection>,
    State(loads): State<LoadCollection>,
    State(mongo): State<mongodb::Client>,
    user: UserModel,
    Json(request): Json<CreateRequest>,
) -> Result<Json<CreateResponse>, Error> {
    match user.role {
        UserRole::Shipper | UserRole::Admin | UserRole::Superadmin => {
            return Err(Error::Forbidden)
                .tap_err(|_| tracing::debug!("only truckers can bid on loads"))
        }
        UserRole::Trucker => {}
    }

    let mut session = mongo.start_session(None).await?;
    session.start_transaction(transaction_options()).await?;

    // The load and the current winning amount are read inside the
    // transaction so concurrent bids on the same load serialize instead of
    // comparing against a stale winner.
    let load = loads
        .find_exists_one_by_id_with_session(request.load_id.0, &mut session)
        .await?
        .ok_or(Error::NoResource)
        .tap_err(|_| tracing::debug!("tried bidding on non existing load"))?;

    if load.status != super::load::LoadStatus::Pending {
        return Err(Error::LoadNotBiddable)
            .tap_err(|_| tracing::debug!("tried bidding on a non pending load"));
    }

    let is_eligible = user.is_eligible();

    let bid = BidModel {
        id: ObjectId::new(),
        load_id: load.id,
        trucker_id: user.id,
        amount: request.amount,
        status: BidStatus::Pending,
        notes: request.notes,
        trucker_eligible: is_eligible,
        expires_at: (OffsetDateTime::now_utc() + Duration::hours(24)).into(),
        accepted_at: None,
        rejected_at: None,
        created_at: OffsetDateTime::now_utc().into(),
    };

    bids.insert_one_with_session(&bid, None, &mut session)
        .await?;

    let current_winning_amount = match load.winning_bid {
        Some(winning_bid_id) => bids
            .find_exists_one_by_id_with_session(winning_bid_id, &mut session)
            .await?
            .map(|it| it.amount),
        None => None,
    };

    if bid.undercuts(current_winning_amount) {
        loads
            .update_exists_one_by_id_with_session(
                load.id,
                bson::doc! {
                    "$set": {
                        "winning_bid": bid.id,
                        "updated_at": bson::DateTime::from(OffsetDateTime::now_utc()),
                    }
                },
                None,
                &mut session,
            )
            .await?;
    }

    session.commit_transaction().await?;

    Ok(Json(CreateResponse {
        bid: bid.into(),
        is_eligible,
    }))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IndexResponse {
    pub bids: Vec<Bid>,
}

pub async fn index_for_load(
    State(bids): State<BidCollection>,
    _user: UserAccess,
    PathObjectId(load_id): PathObjectId,
) -> Result<Json<IndexResponse>, Error> {
    let mut cursor = bids.find(bson::doc! { "load_id": load_id }, None).await?;

    let mut result: Vec<BidModel> = vec![];

    while cursor.advance().await? {
        result.push(cursor.deserialize_current()?);
    }

    // Amounts persist as decimal strings, so ordering happens here rather
    // than in the query.
    result.sort_by(|a, b| a.amount.cmp(&b.amount));

    Ok(Json(IndexResponse {
        bids: result.into_iter().map(Into::into).collect(),
    }))
}

pub async fn index_for_trucker(
    State(bids): State<BidCollection>,
    user: UserAccess,
) -> Result<Json<IndexResponse>, Error> {
    match user.role {
        UserRole::Shipper | UserRole::Admin | UserRole::Superadmin => {
            return Err(Error::Forbidden)
        }
        UserRole::Trucker => {}
    }

    let options = mongodb::options::FindOptions::builder()
        .sort(bson::doc! { "created_at": -1 })
        .build();

    let mut cursor = bids
        .find(bson::doc! { "trucker_id": user.id }, options)
        .await?;

    let mut result = vec![];

    while cursor.advance().await? {
        let bid = cursor.deserialize_current()?;
        result.push(bid.into());
    }

    Ok(Json(IndexResponse { bids: result }))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AcceptResponse {
    pub bid: Bid,
    pub load: Load,
}

#[tracing::instrument(
    skip_all,
    fields(
        id = %bid_id,
        user = ?user,
    )
)]
pub async fn accept(
    State(bids): State<BidCollection>,
    State(loads): State<LoadCollection>,
    State(mongo): State<mongodb::Client>,
    user: UserAccess,
    PathObjectId(bid_id): PathObjectId,
) -> Result<Json<AcceptResponse>, Error> {
    match user.role {
        UserRole::Trucker | UserRole::Admin | UserRole::Superadmin => {
            return Err(Error::Forbidden)
                .tap_err(|_| tracing::debug!("only shippers can accept bids"))
        }
        UserRole::Shipper => {}
    }

    let mut bid = bids
        .find_one(bson::doc! { "_id": bid_id }, None)
        .await?
        .ok_or(Error::NoResource)
        .tap_err(|_| tracing::debug!("tried accepting non existing bid"))?;

    let mut load = loads
        .find_one(bson::doc! { "_id": bid.load_id }, None)
        .await?
        .ok_or(Error::NoResource)
        .tap_err(|_| tracing::debug!("bid references non existing load"))?;

    if load.shipper_id != user.id {
        return Err(Error::Forbidden)
            .tap_err(|_| tracing::debug!("tried accepting bid on other shipper load"));
    }

    if !bid.trucker_eligible {
        return Err(Error::IneligibleTrucker);
    }

    let new_status = load.status.apply(LoadAction::Accept, LoadActor::Shipper)?;

    let now = bson::DateTime::from(OffsetDateTime::now_utc());

    // Bid and load move together or not at all.
    let mut session = mongo.start_session(None).await?;
    session.start_transaction(transaction_options()).await?;

    bids.update_exists_one_by_id_with_session(
        bid.id,
        bson::doc! {
            "$set": {
                "status": bson::to_bson(&BidStatus::Accepted)?,
                "accepted_at": now,
            }
        },
        None,
        &mut session,
    )
    .await?;

    loads
        .update_exists_one_by_id_with_session(
            load.id,
            bson::doc! {
                "$set": {
                    "status": bson::to_bson(&new_status)?,
                    "assigned_trucker": bid.trucker_id,
                    "price": bson::to_bson(&bid.amount)?,
                    "winning_bid": bid.id,
                    "updated_at": now,
                }
            },
            None,
            &mut session,
        )
        .await?;

    session.commit_transaction().await?;

    bid.status = BidStatus::Accepted;
    bid.accepted_at = Some(now);

    load.status = new_status;
    load.assigned_trucker = Some(bid.trucker_id);
    load.price = bid.amount;
    load.winning_bid = Some(bid.id);
    load.updated_at = now;

    Ok(Json(AcceptResponse {
        bid: bid.into(),
        load: load.into(),
    }))
}
