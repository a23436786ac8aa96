// Codec for the supplier's availability wire format: AvailRQ out, AvailRS
// back. Decoding flattens the hotel/meal-plan/option/room nesting into the
// flat offers the engine works with; whatever the engine does not model is
// preserved in the offer's raw payload for later PreBook calls.

use crate::model::Offer;
use quick_xml::de::from_str;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AvailabilityError {
    #[error("XML parse error: {0}")]
    XmlParse(String),

    #[error("XML write error: {0}")]
    XmlWrite(String),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid format: {0}")]
    InvalidFormat(String),
}

#[derive(Debug, Serialize)]
#[serde(rename = "AvailRQ", rename_all = "PascalCase")]
struct AvailRq<'a> {
    currency: &'a str,
    nationality: &'a str,
    start_date: &'a str,
    end_date: &'a str,
    destination: &'a str,
    occupancy: Occupancy,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct Occupancy {
    adults: u32,
    children: u32,
}

/// Builds the availability request body for the given search.
pub fn encode_avail_request(
    criteria: &crate::supplier::SearchCriteria,
) -> Result<String, AvailabilityError> {
    let request = AvailRq {
        currency: &criteria.currency,
        nationality: &criteria.nationality,
        start_date: &criteria.check_in,
        end_date: &criteria.check_out,
        destination: &criteria.destination_code,
        occupancy: Occupancy {
            adults: criteria.adults,
            children: criteria.children,
        },
    };
    quick_xml::se::to_string(&request).map_err(|e| AvailabilityError::XmlWrite(e.to_string()))
}

// AvailRS deserialization structures. Everything arrives as attributes or
// text; prices stay strings until validated.

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
#[serde(rename = "AvailRS")]
struct AvailRs {
    hotels: XmlHotels,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct XmlHotels {
    #[serde(rename = "Hotel")]
    hotels: Vec<XmlHotel>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct XmlHotel {
    #[serde(rename = "@code")]
    code: String,
    #[serde(rename = "@name")]
    name: String,
    meal_plans: XmlMealPlans,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct XmlMealPlans {
    #[serde(rename = "MealPlan")]
    meal_plans: Vec<XmlMealPlan>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct XmlMealPlan {
    #[serde(rename = "@code")]
    code: String,
    options: XmlOptions,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct XmlOptions {
    #[serde(rename = "Option")]
    options: Vec<XmlOption>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct XmlOption {
    #[serde(rename = "@paymentType")]
    payment_type: String,
    #[serde(rename = "@status")]
    status: String,
    price: XmlPrice,
    rooms: XmlRooms,
    parameters: XmlParameters,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct XmlPrice {
    #[serde(rename = "@currency")]
    currency: String,
    #[serde(rename = "@amount")]
    amount: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct XmlRooms {
    #[serde(rename = "Room")]
    rooms: Vec<XmlRoom>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct XmlRoom {
    #[serde(rename = "@code")]
    code: String,
    #[serde(rename = "@description")]
    description: String,
    #[serde(rename = "@nonRefundable")]
    non_refundable: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct XmlParameters {
    #[serde(rename = "Parameter")]
    parameters: Vec<XmlParameter>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct XmlParameter {
    #[serde(rename = "@key")]
    key: String,
    #[serde(rename = "@value")]
    value: String,
}

/// Decodes an AvailRS payload into offers, one per bookable option. The
/// option's `search_token` parameter is the supplier's room/rate identity
/// and becomes the offer key; options without one fall back to a
/// hotel/meal-plan/room composite.
pub fn decode_avail_response(xml: &str) -> Result<Vec<Offer>, AvailabilityError> {
    let response: AvailRs =
        from_str(xml).map_err(|e| AvailabilityError::XmlParse(e.to_string()))?;

    let mut offers = Vec::new();
    for hotel in &response.hotels.hotels {
        if hotel.code.is_empty() {
            return Err(AvailabilityError::MissingField("Hotel@code".to_string()));
        }
        for meal_plan in &hotel.meal_plans.meal_plans {
            for option in &meal_plan.options.options {
                if !option.status.is_empty() && option.status != "OK" {
                    continue;
                }
                let price_quote: f64 = option.price.amount.parse().map_err(|_| {
                    AvailabilityError::InvalidFormat(format!(
                        "price amount {:?} for hotel {}",
                        option.price.amount, hotel.code
                    ))
                })?;

                let room = option.rooms.rooms.first();
                let offer_key = option
                    .parameters
                    .parameters
                    .iter()
                    .find(|p| p.key == "search_token")
                    .map(|p| p.value.clone())
                    .unwrap_or_else(|| {
                        format!(
                            "{}:{}:{}",
                            hotel.code,
                            meal_plan.code,
                            room.map(|r| r.code.as_str()).unwrap_or("-")
                        )
                    });

                offers.push(Offer {
                    offer_key,
                    hotel_id: hotel.code.clone(),
                    price_quote,
                    currency: option.price.currency.clone(),
                    raw_supplier_payload: serde_json::json!({
                        "hotel_name": hotel.name,
                        "meal_plan": meal_plan.code,
                        "payment_type": option.payment_type,
                        "room_code": room.map(|r| r.code.clone()),
                        "room_description": room.map(|r| r.description.clone()),
                        "non_refundable": room
                            .map(|r| r.non_refundable.eq_ignore_ascii_case("true"))
                            .unwrap_or(false),
                    }),
                });
            }
        }
    }
    Ok(offers)
}

// A small sample for inline testing.
#[cfg(test)]
pub const SMALL_SAMPLE_XML: &str = r#"
<AvailRS>
  <Hotels>
    <Hotel code="39776757" name="Days Inn By Wyndham Fargo">
      <MealPlans>
        <MealPlan code="RO">
          <Options>
            <Option type="Hotel" paymentType="MerchantPay" status="OK">
              <Price currency="GBP" amount="84.82" binding="false" commission="-1" minimumSellingPrice="-1"/>
              <Rooms>
                <Room id="1#ND1" roomCandidateRefId="1" code="ND1" description="ROOM, QUEEN BED" numberOfUnits="1" nonRefundable="false"/>
              </Rooms>
              <Parameters>
                <Parameter key="search_token" value="39776757|2025-06-11|2025-06-12|A|US|GBP"/>
              </Parameters>
            </Option>
          </Options>
        </MealPlan>
      </MealPlans>
    </Hotel>
  </Hotels>
</AvailRS>
"#;
